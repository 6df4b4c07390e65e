//! Md5 password authentication.
use md5::{Digest, Md5};

/// Compute the md5 password response.
///
/// The password is `"md5" + hex(md5(hex(md5(password + user)) + salt))`.
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut md5 = Md5::new();
    md5.update(password.as_bytes());
    md5.update(user.as_bytes());
    let inner = format!("{:x}", md5.finalize_reset());

    md5.update(inner.as_bytes());
    md5.update(salt);

    format!("md5{:x}", md5.finalize())
}
