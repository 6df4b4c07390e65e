//! Scripted postgres backend over loopback tcp.
#![allow(dead_code)]
use std::{future::Future, io, net::SocketAddr};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use md5::Md5;
use postwire::Config;
use sha2::{Digest, Sha256};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

pub const USER: &str = "alice";
pub const PASSWORD: &str = "secret";

const SALT: &[u8] = b"postwire-test-salt";
const ITERATIONS: u32 = 4096;
const MD5_SALT: [u8; 4] = [0x0a, 0x0b, 0x0c, 0x0d];

pub fn run<F: Future>(f: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(f)
}

/// Statement received by the server within one `Sync`.
#[derive(Debug, Clone)]
pub struct Query {
    pub sql: String,
    pub params: Vec<Option<String>>,
}

/// Response to a [`Query`].
pub enum Reply {
    /// Bytes written back, expected to end with `ReadyForQuery`.
    Send(Vec<u8>),
    /// Write bytes then close the socket.
    Close(Vec<u8>),
    /// Send nothing, keep reading until the client disconnects.
    Stall,
}

/// Startup behavior of the server.
#[derive(Debug, Default)]
pub struct Setup {
    pub auth: Auth,
    /// Bytes written between `AuthenticationOk` and `ReadyForQuery`.
    pub before_ready: Vec<u8>,
}

/// Authentication requested by the server.
#[derive(Debug, Default, Clone, Copy)]
pub enum Auth {
    #[default]
    Scram,
    /// `SASLFinal` carrying a signature not derived from the password.
    ForgedSignature,
    /// `SASLFinal` carrying the `e=` error attribute.
    ScramError,
    Md5,
    Cleartext,
}

/// Frontend message tags received after startup.
pub type Log = Vec<u8>;

pub struct Server {
    pub addr: SocketAddr,
    pub handle: JoinHandle<io::Result<Log>>,
}

impl Server {
    pub fn config(&self) -> Config {
        Config::new()
            .host(&self.addr.ip().to_string())
            .port(self.addr.port())
            .user(USER)
            .password(PASSWORD)
            .database("app")
    }

    /// Wait for the client to disconnect, returns received tags.
    pub async fn finish(self) -> Log {
        self.handle.await.unwrap().unwrap()
    }
}

/// Serve a single client, authenticated with `SCRAM-SHA-256`.
pub async fn serve<H>(handler: H) -> Server
where
    H: FnMut(&Query) -> Reply + Send + 'static,
{
    serve_with(Setup::default(), handler).await
}

/// Serve a single client.
pub async fn serve_with<H>(setup: Setup, handler: H) -> Server
where
    H: FnMut(&Query) -> Reply + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await?;
        session(socket, setup, handler).await
    });
    Server { addr, handle }
}

async fn session<H>(mut socket: TcpStream, setup: Setup, mut handler: H) -> io::Result<Log>
where
    H: FnMut(&Query) -> Reply,
{
    let params = read_startup(&mut socket).await?;
    assert_eq!(param(&params, "user"), Some(USER));
    assert_eq!(param(&params, "client_encoding"), Some("UTF8"));

    let authenticated = match setup.auth {
        method @ (Auth::Scram | Auth::ForgedSignature | Auth::ScramError) => scram(&mut socket, method).await?,
        Auth::Md5 => md5_password(&mut socket).await?,
        Auth::Cleartext => cleartext(&mut socket).await?,
    };
    if !authenticated {
        return Ok(vec![]);
    }

    let mut out = vec![];
    out.extend(auth(0, &[]));
    out.extend(parameter_status("server_version", "17.0"));
    out.extend(parameter_status("client_encoding", "UTF8"));
    out.extend(backend_key_data(4242, 0xdead));
    out.extend(setup.before_ready);
    out.extend(ready(b'I'));
    socket.write_all(&out).await?;

    let mut log = vec![];
    let mut query = Query { sql: String::new(), params: vec![] };

    loop {
        let Some((tag, body)) = read_message(&mut socket).await? else {
            return Ok(log);
        };
        log.push(tag);

        match tag {
            b'P' => {
                let mut body = &body[..];
                cstr(&mut body);
                query.sql = cstr(&mut body);
            },
            b'B' => query.params = bind_params(&body),
            b'S' => match handler(&query) {
                Reply::Send(bytes) => socket.write_all(&bytes).await?,
                Reply::Close(bytes) => {
                    socket.write_all(&bytes).await?;
                    return Ok(log);
                },
                Reply::Stall => { },
            },
            b'X' => return Ok(log),
            _ => { },
        }
    }
}

/// Run the server side of `SCRAM-SHA-256`, returns `false` when the exchange is rejected.
async fn scram(socket: &mut TcpStream, method: Auth) -> io::Result<bool> {
    let mut body = vec![];
    body.extend(b"SCRAM-SHA-256\0");
    body.push(0);
    socket.write_all(&auth(10, &body)).await?;

    let (tag, body) = read_message(socket).await?.unwrap();
    assert_eq!(tag, b'p');
    let mut body = &body[..];
    assert_eq!(cstr(&mut body), "SCRAM-SHA-256");
    let len = i32::from_be_bytes(body[..4].try_into().unwrap()) as usize;
    let client_first = std::str::from_utf8(&body[4..4 + len]).unwrap().to_owned();

    let client_first_bare = client_first.strip_prefix("n,,").unwrap();
    let client_nonce = client_first_bare.split(',').find_map(|e|e.strip_prefix("r=")).unwrap();
    let server_first = format!(
        "r={client_nonce}3rfcNHYJY1ZVvWVs7j,s={},i={ITERATIONS}",
        BASE64.encode(SALT)
    );
    socket.write_all(&auth(11, server_first.as_bytes())).await?;

    let (tag, body) = read_message(socket).await?.unwrap();
    assert_eq!(tag, b'p');
    let client_final = std::str::from_utf8(&body).unwrap();
    let (without_proof, proof) = client_final.rsplit_once(",p=").unwrap();
    assert!(without_proof.starts_with("c=biws,r="));

    let auth_message = format!("{client_first_bare},{server_first},{without_proof}");

    let salted = pbkdf2::pbkdf2_hmac_array::<Sha256, 32>(PASSWORD.as_bytes(), SALT, ITERATIONS);
    let client_key = hmac(&salted, b"Client Key");
    let stored_key = Sha256::digest(client_key);
    let signature = hmac(&stored_key, auth_message.as_bytes());
    let expected = client_key
        .iter()
        .zip(signature)
        .map(|(a, b)|a ^ b)
        .collect::<Vec<_>>();

    if BASE64.decode(proof).unwrap() != expected {
        socket.write_all(&password_failed()).await?;
        return Ok(false);
    }

    let server_final = match method {
        Auth::ForgedSignature => {
            let forged = hmac(b"not the server key", auth_message.as_bytes());
            format!("v={}", BASE64.encode(forged))
        },
        Auth::ScramError => "e=invalid-proof".to_owned(),
        _ => {
            let server_key = hmac(&salted, b"Server Key");
            format!("v={}", BASE64.encode(hmac(&server_key, auth_message.as_bytes())))
        },
    };
    socket.write_all(&auth(12, server_final.as_bytes())).await?;

    Ok(matches!(method, Auth::Scram))
}

/// Expect `"md5" + hex(md5(hex(md5(password + user)) + salt))`.
async fn md5_password(socket: &mut TcpStream) -> io::Result<bool> {
    socket.write_all(&auth(5, &MD5_SALT)).await?;

    let inner = format!("{:x}", Md5::digest(format!("{PASSWORD}{USER}")));
    let mut outer = inner.into_bytes();
    outer.extend(MD5_SALT);
    let expected = format!("md5{:x}", Md5::digest(&outer));

    verify_password(socket, &expected).await
}

async fn cleartext(socket: &mut TcpStream) -> io::Result<bool> {
    socket.write_all(&auth(3, &[])).await?;
    verify_password(socket, PASSWORD).await
}

async fn verify_password(socket: &mut TcpStream, expected: &str) -> io::Result<bool> {
    let (tag, body) = read_message(socket).await?.unwrap();
    assert_eq!(tag, b'p');
    let password = cstr(&mut &body[..]);

    if password != expected {
        socket.write_all(&password_failed()).await?;
        return Ok(false);
    }
    Ok(true)
}

fn password_failed() -> Vec<u8> {
    error_response("FATAL", "28P01", "password authentication failed for user \"alice\"")
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().into()
}

// ===== Frontend =====

async fn read_startup(socket: &mut TcpStream) -> io::Result<Vec<(String, String)>> {
    let len = socket.read_u32().await? as usize;
    let mut body = vec![0u8; len - 4];
    socket.read_exact(&mut body).await?;

    assert_eq!(&body[..4], &0x0003_0000u32.to_be_bytes());

    let mut body = &body[4..];
    let mut params = vec![];
    while body.first() != Some(&0) {
        let key = cstr(&mut body);
        let value = cstr(&mut body);
        params.push((key, value));
    }
    Ok(params)
}

async fn read_message(socket: &mut TcpStream) -> io::Result<Option<(u8, Vec<u8>)>> {
    let tag = match socket.read_u8().await {
        Ok(tag) => tag,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    };
    let len = socket.read_u32().await? as usize;
    let mut body = vec![0u8; len - 4];
    socket.read_exact(&mut body).await?;
    Ok(Some((tag, body)))
}

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params.iter().find(|(k, _)|k == key).map(|(_, v)|v.as_str())
}

fn cstr(body: &mut &[u8]) -> String {
    let end = body.iter().position(|e|*e == 0).unwrap();
    let value = String::from_utf8(body[..end].to_vec()).unwrap();
    *body = &body[end + 1..];
    value
}

fn bind_params(body: &[u8]) -> Vec<Option<String>> {
    let mut body = body;
    cstr(&mut body);
    cstr(&mut body);

    let i16_at = |body: &[u8]|i16::from_be_bytes([body[0], body[1]]);

    let formats = i16_at(body) as usize;
    body = &body[2 + formats * 2..];

    let count = i16_at(body) as usize;
    body = &body[2..];

    let mut params = Vec::with_capacity(count);
    for _ in 0..count {
        let len = i32::from_be_bytes(body[..4].try_into().unwrap());
        body = &body[4..];
        if len < 0 {
            params.push(None);
        } else {
            let (value, rest) = body.split_at(len as usize);
            params.push(Some(String::from_utf8(value.to_vec()).unwrap()));
            body = rest;
        }
    }
    params
}

// ===== Backend =====

pub fn message(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + body.len());
    out.push(tag);
    out.extend(((body.len() + 4) as u32).to_be_bytes());
    out.extend(body);
    out
}

pub fn auth(kind: u32, data: &[u8]) -> Vec<u8> {
    let mut body = kind.to_be_bytes().to_vec();
    body.extend(data);
    message(b'R', &body)
}

pub fn parameter_status(name: &str, value: &str) -> Vec<u8> {
    message(b'S', format!("{name}\0{value}\0").as_bytes())
}

pub fn backend_key_data(process_id: u32, secret_key: u32) -> Vec<u8> {
    let mut body = process_id.to_be_bytes().to_vec();
    body.extend(secret_key.to_be_bytes());
    message(b'K', &body)
}

pub fn ready(status: u8) -> Vec<u8> {
    message(b'Z', &[status])
}

pub fn parse_complete() -> Vec<u8> {
    message(b'1', &[])
}

pub fn bind_complete() -> Vec<u8> {
    message(b'2', &[])
}

pub fn no_data() -> Vec<u8> {
    message(b'n', &[])
}

pub fn empty_query() -> Vec<u8> {
    message(b'I', &[])
}

pub fn command_complete(tag: &str) -> Vec<u8> {
    message(b'C', format!("{tag}\0").as_bytes())
}

pub fn notice(message_text: &str) -> Vec<u8> {
    message(b'N', format!("SNOTICE\0VNOTICE\0C00000\0M{message_text}\0\0").as_bytes())
}

pub fn error_response(severity: &str, code: &str, text: &str) -> Vec<u8> {
    message(b'E', format!("S{severity}\0V{severity}\0C{code}\0M{text}\0\0").as_bytes())
}

pub fn row_description(columns: &[(&str, u32)]) -> Vec<u8> {
    let mut body = (columns.len() as i16).to_be_bytes().to_vec();
    for (name, oid) in columns {
        body.extend(name.as_bytes());
        body.push(0);
        body.extend(0u32.to_be_bytes());
        body.extend(0i16.to_be_bytes());
        body.extend(oid.to_be_bytes());
        body.extend((-1i16).to_be_bytes());
        body.extend((-1i32).to_be_bytes());
        body.extend(0i16.to_be_bytes());
    }
    message(b'T', &body)
}

pub fn data_row(values: &[Option<&str>]) -> Vec<u8> {
    let mut body = (values.len() as i16).to_be_bytes().to_vec();
    for value in values {
        match value {
            Some(value) => {
                body.extend((value.len() as i32).to_be_bytes());
                body.extend(value.as_bytes());
            },
            None => body.extend((-1i32).to_be_bytes()),
        }
    }
    message(b'D', &body)
}

/// Successful extended query cycle.
pub fn rows(columns: &[(&str, u32)], rows: &[&[Option<&str>]], tag: &str) -> Reply {
    let mut out = vec![];
    out.extend(parse_complete());
    out.extend(bind_complete());
    match columns.is_empty() {
        true => out.extend(no_data()),
        false => out.extend(row_description(columns)),
    }
    for row in rows {
        out.extend(data_row(row));
    }
    out.extend(command_complete(tag));
    out.extend(ready(b'I'));
    Reply::Send(out)
}

/// Statement rejected by the server, the rest of the cycle is skipped.
pub fn failure(code: &str, text: &str) -> Reply {
    let mut out = vec![];
    out.extend(parse_complete());
    out.extend(bind_complete());
    out.extend(row_description(&[("?column?", 23)]));
    out.extend(error_response("ERROR", code, text));
    out.extend(ready(b'I'));
    Reply::Send(out)
}
