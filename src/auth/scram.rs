use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Client side of one SCRAM-SHA-256 exchange.
///
/// Construct per connection attempt; the nonce is single-use.
#[derive(Debug)]
pub struct ScramExchange {
    client_nonce: String,
    client_first_bare: String,
}

/// Carries what is needed to verify the server's final signature after
/// the client proof has been sent.
#[derive(Debug)]
pub struct ServerCheck {
    salted_password: Vec<u8>,
    auth_message: String,
}

impl ScramExchange {
    pub fn new(username: &str) -> ScramExchange {
        let mut nonce = [0u8; 18];
        rand::rng().fill_bytes(&mut nonce);
        Self::with_nonce(username, &B64.encode(nonce))
    }

    /// Fixed-nonce constructor for test vectors and mock servers.
    pub fn with_nonce(username: &str, nonce: &str) -> ScramExchange {
        let user = escape_username(username);
        ScramExchange {
            client_nonce: nonce.to_owned(),
            client_first_bare: format!("n={user},r={nonce}"),
        }
    }

    /// The `client-first-message`, with the GS2 no-channel-binding
    /// prefix.
    pub fn client_first(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    /// Consume the `server-first-message` and produce the
    /// `client-final-message` plus the state to verify the server's
    /// answer.
    pub fn finalize(&self, password: &str, server_first: &str) -> Result<(String, ServerCheck)> {
        let (server_nonce, salt_b64, iterations) = parse_server_first(server_first)?;
        if !server_nonce.starts_with(&self.client_nonce) {
            return Err(Error::Auth("SCRAM nonce mismatch".into()));
        }
        let salt = B64
            .decode(salt_b64.as_bytes())
            .map_err(|e| Error::Auth(format!("bad SCRAM salt base64: {e}")))?;

        let gs2_header_b64 = "biws"; // base64("n,,")
        let client_final_bare = format!("c={gs2_header_b64},r={server_nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_bare
        );

        let salted_password = hi(password.as_bytes(), &salt, iterations);
        let client_key = hmac(&salted_password, b"Client Key");
        let stored_key = Sha256::digest(&client_key);
        let client_signature = hmac(stored_key.as_slice(), auth_message.as_bytes());

        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        let client_final = format!("{client_final_bare},p={}", B64.encode(proof));
        Ok((
            client_final,
            ServerCheck {
                salted_password,
                auth_message,
            },
        ))
    }
}

impl ServerCheck {
    /// Verify the server signature in the `server-final-message`.
    pub fn verify(&self, server_final: &str) -> Result<()> {
        let v = server_final
            .split(',')
            .find_map(|p| p.strip_prefix("v="))
            .ok_or_else(|| Error::Auth("SCRAM final message missing v=".into()))?;
        let server_signature = B64
            .decode(v.trim().as_bytes())
            .map_err(|e| Error::Auth(format!("bad server signature base64: {e}")))?;

        let server_key = hmac(&self.salted_password, b"Server Key");
        let expected = hmac(&server_key, self.auth_message.as_bytes());
        if server_signature != expected {
            return Err(Error::Auth("SCRAM server signature mismatch".into()));
        }
        Ok(())
    }
}

fn parse_server_first(server_first: &str) -> Result<(String, String, u32)> {
    let mut nonce = None;
    let mut salt = None;
    let mut iterations = None;
    for part in server_first.split(',') {
        if let Some(v) = part.strip_prefix("r=") {
            nonce = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("s=") {
            salt = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("i=") {
            iterations = v.parse::<u32>().ok();
        }
    }
    Ok((
        nonce.ok_or_else(|| Error::Auth("SCRAM server-first missing r=".into()))?,
        salt.ok_or_else(|| Error::Auth("SCRAM server-first missing s=".into()))?,
        iterations.ok_or_else(|| Error::Auth("SCRAM server-first missing i=".into()))?,
    ))
}

fn escape_username(u: &str) -> String {
    u.replace('=', "=3D").replace(',', "=2C")
}

/// RFC 5802 Hi(): PBKDF2 with HMAC-SHA-256 folded by XOR.
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut block = Vec::with_capacity(salt.len() + 4);
    block.extend_from_slice(salt);
    block.extend_from_slice(&1u32.to_be_bytes());

    let mut u = hmac(password, &block);
    let mut out = u.clone();

    for _ in 1..iterations {
        u = hmac(password, &u);
        for (o, ui) in out.iter_mut().zip(u.iter()) {
            *o ^= *ui;
        }
    }
    out
}

fn hmac(key: &[u8], msg: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(msg);
    mac.finalize().into_bytes().to_vec()
}
