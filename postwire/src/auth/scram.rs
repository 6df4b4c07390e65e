//! `SCRAM-SHA-256` authentication, [RFC 5802] and [RFC 7677].
//!
//! Channel binding is not supported, the gs2 header is always `n,,`.
//!
//! ```text
//! client                                server
//!   | SASLInitialResponse(client-first)    |
//!   |------------------------------------->|
//!   |      SASLContinue(server-first)      |
//!   |<-------------------------------------|
//!   | SASLResponse(client-final)           |
//!   |------------------------------------->|
//!   |        SASLFinal(server-final)       |
//!   |<-------------------------------------|
//! ```
//!
//! [RFC 5802]: https://datatracker.ietf.org/doc/html/rfc5802
//! [RFC 7677]: https://datatracker.ietf.org/doc/html/rfc7677
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::AuthError;
use crate::common::span;

type HmacSha256 = Hmac<Sha256>;

/// gs2 header, no channel binding and no authzid.
const GS2_HEADER: &str = "n,,";

/// base64 of [`GS2_HEADER`].
const CHANNEL_BINDING: &str = "biws";

const NONCE_LEN: usize = 18;

/// SCRAM client state for a single authentication exchange.
///
/// Key material is wiped on drop.
pub struct Scram {
    password: Vec<u8>,
    client_nonce: String,
    client_first_bare: String,
    stage: Stage,
}

enum Stage {
    ClientFirst,
    ServerFirst {
        server_key: [u8; 32],
        auth_message: String,
    },
    Done,
}

impl Scram {
    /// SASL mechanism name.
    pub const MECHANISM: &str = "SCRAM-SHA-256";

    /// Create new exchange with random nonce.
    pub fn new(user: &str, password: &str) -> Scram {
        let mut raw = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut raw);
        Self::with_nonce(user, password, BASE64.encode(raw))
    }

    pub(crate) fn with_nonce(user: &str, password: &str, client_nonce: String) -> Scram {
        // libpq use the raw password when it is not valid SASLprep input
        let password = match stringprep::saslprep(password) {
            Ok(prepped) => prepped.as_bytes().to_vec(),
            Err(_) => password.as_bytes().to_vec(),
        };

        let client_first_bare = format!("n={},r={client_nonce}", escape_username(user));

        Scram {
            password,
            client_nonce,
            client_first_bare,
            stage: Stage::ClientFirst,
        }
    }

    /// The `client-first-message`, sent with `SASLInitialResponse`.
    pub fn client_first(&self) -> Vec<u8> {
        let mut message = String::with_capacity(GS2_HEADER.len() + self.client_first_bare.len());
        message.push_str(GS2_HEADER);
        message.push_str(&self.client_first_bare);
        message.into_bytes()
    }

    /// Process `server-first-message`, returns `client-final-message`.
    pub fn server_first(&mut self, data: &[u8]) -> Result<Vec<u8>, AuthError> {
        if !matches!(self.stage, Stage::ClientFirst) {
            return Err(AuthError::OutOfOrder);
        }

        span!("scram_server_first");

        let Ok(server_first) = std::str::from_utf8(data) else {
            return Err(AuthError::InvalidMessage("server-first-message is not utf8"));
        };

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;

        for (key, value) in attributes(server_first) {
            match key {
                "m" => return Err(AuthError::UnsupportedExtension),
                "e" => return Err(AuthError::ServerError(value.into())),
                "r" => nonce = Some(value),
                "s" => salt = Some(value),
                "i" => iterations = Some(value),
                _ => { },
            }
        }

        let Some(nonce) = nonce else {
            return Err(AuthError::InvalidMessage("missing nonce"));
        };
        let Some(salt) = salt else {
            return Err(AuthError::InvalidMessage("missing salt"));
        };
        let Some(iterations) = iterations else {
            return Err(AuthError::InvalidMessage("missing iteration count"));
        };

        if !nonce.starts_with(&self.client_nonce) || nonce.len() <= self.client_nonce.len() {
            return Err(AuthError::NonceMismatch);
        }

        let Ok(salt) = BASE64.decode(salt) else {
            return Err(AuthError::InvalidMessage("invalid salt encoding"));
        };

        let iterations = match iterations.parse::<u32>() {
            Ok(0) | Err(_) => return Err(AuthError::InvalidMessage("invalid iteration count")),
            Ok(ok) => ok,
        };

        let mut salted_password = pbkdf2::pbkdf2_hmac_array::<Sha256, 32>(&self.password, &salt, iterations);

        let mut client_key = hmac(&salted_password, b"Client Key")?;
        let server_key = hmac(&salted_password, b"Server Key")?;
        let mut stored_key = Sha256::digest(client_key);
        wipe(&mut salted_password);

        let client_final_without_proof = format!("c={CHANNEL_BINDING},r={nonce}");
        let auth_message = format!(
            "{},{server_first},{client_final_without_proof}",
            self.client_first_bare
        );

        let mut client_signature = hmac(&stored_key, auth_message.as_bytes())?;
        wipe(&mut stored_key);

        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(&client_signature) {
            *p ^= s;
        }
        wipe(&mut client_key);
        wipe(&mut client_signature);

        let client_final = format!("{client_final_without_proof},p={}", BASE64.encode(proof));

        self.stage = Stage::ServerFirst { server_key, auth_message };

        Ok(client_final.into_bytes())
    }

    /// Verify `server-final-message`.
    pub fn server_final(&mut self, data: &[u8]) -> Result<(), AuthError> {
        let Stage::ServerFirst { server_key, auth_message } = &self.stage else {
            return Err(AuthError::OutOfOrder);
        };

        let Ok(server_final) = std::str::from_utf8(data) else {
            return Err(AuthError::InvalidMessage("server-final-message is not utf8"));
        };

        let mut verifier = None;

        for (key, value) in attributes(server_final) {
            match key {
                "e" => return Err(AuthError::ServerError(value.into())),
                "v" => verifier = Some(value),
                _ => { },
            }
        }

        let Some(verifier) = verifier else {
            return Err(AuthError::InvalidMessage("missing server signature"));
        };

        let Ok(verifier) = BASE64.decode(verifier) else {
            return Err(AuthError::InvalidMessage("invalid server signature encoding"));
        };

        let Ok(mut mac) = HmacSha256::new_from_slice(server_key) else {
            return Err(AuthError::InvalidMessage("invalid key length"));
        };
        mac.update(auth_message.as_bytes());

        // constant time comparison
        mac.verify_slice(&verifier).map_err(|_|AuthError::SignatureMismatch)?;

        self.wipe_stage();
        Ok(())
    }

    fn wipe_stage(&mut self) {
        if let Stage::ServerFirst { server_key, .. } = &mut self.stage {
            wipe(server_key);
        }
        self.stage = Stage::Done;
    }
}

impl Drop for Scram {
    fn drop(&mut self) {
        wipe(&mut self.password);
        self.wipe_stage();
    }
}

impl std::fmt::Debug for Scram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scram")
            .field("client_first_bare", &self.client_first_bare)
            .finish_non_exhaustive()
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<[u8; 32], AuthError> {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return Err(AuthError::InvalidMessage("invalid key length"));
    };
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Iterate `key=value` pairs separated by comma.
fn attributes(message: &str) -> impl Iterator<Item = (&str, &str)> {
    message.split(',').filter_map(|attr| attr.split_once('='))
}

/// `=` and `,` is not allowed in saslname.
fn escape_username(user: &str) -> std::borrow::Cow<'_, str> {
    if !user.contains(['=', ',']) {
        return user.into();
    }
    user.replace('=', "=3D").replace(',', "=2C").into()
}

fn wipe(bytes: &mut [u8]) {
    bytes.fill(0);
    let _ = std::hint::black_box(bytes);
}
