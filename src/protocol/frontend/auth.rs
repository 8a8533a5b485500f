//! Authentication messages and password hashing.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::protocol::codec::MessageBuilder;

/// SASL mechanism this client speaks.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Write a PasswordMessage (cleartext or MD5 hashed password).
pub fn write_password(buf: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish();
}

/// Compute the MD5 password response: `"md5" + md5(md5(password + user) + salt)`.
pub fn md5_password(username: &str, password: &str, salt: &[u8; 4]) -> String {
    use md5::Md5;

    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(username.as_bytes());
    let inner = format!("{:x}", hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(inner.as_bytes());
    hasher.update(salt);
    format!("md5{:x}", hasher.finalize())
}

/// Write a SASLInitialResponse message.
pub fn write_sasl_initial_response(buf: &mut Vec<u8>, mechanism: &str, initial_response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(mechanism);
    msg.write_i32(initial_response.len() as i32);
    msg.write_bytes(initial_response);
    msg.finish();
}

/// Write a SASLResponse message.
pub fn write_sasl_response(buf: &mut Vec<u8>, response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_bytes(response);
    msg.finish();
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|e| Error::Auth(format!("HMAC error: {}", e)))?;
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// SCRAM-SHA-256 client without channel binding.
pub struct ScramClient {
    nonce: String,
    password: String,
    auth_message: Option<String>,
    salted_password: Option<[u8; 32]>,
}

impl ScramClient {
    /// Create a client with a fresh random nonce.
    pub fn new(password: &str) -> Self {
        use rand::Rng;

        let mut nonce_bytes = [0u8; 24];
        rand::rng().fill(&mut nonce_bytes);
        Self::with_nonce(password, STANDARD.encode(nonce_bytes))
    }

    fn with_nonce(password: &str, nonce: String) -> Self {
        Self {
            nonce,
            password: password.to_string(),
            auth_message: None,
            salted_password: None,
        }
    }

    /// The client-first-message. The username is empty; the server uses the startup user.
    pub fn client_first_message(&self) -> String {
        format!("n,,{}", self.client_first_bare())
    }

    fn client_first_bare(&self) -> String {
        format!("n=,r={}", self.nonce)
    }

    /// Consume the server-first-message and produce the client-final-message.
    pub fn process_server_first(&mut self, server_first: &str) -> Result<String> {
        let mut combined_nonce = None;
        let mut salt_b64 = None;
        let mut iterations = None;

        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                combined_nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt_b64 = Some(value);
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = value.parse::<u32>().ok();
            }
        }

        let missing = |what: &str| Error::Auth(format!("Missing {} in server-first-message", what));
        let combined_nonce = combined_nonce.ok_or_else(|| missing("nonce"))?;
        let salt_b64 = salt_b64.ok_or_else(|| missing("salt"))?;
        let iterations = iterations.ok_or_else(|| missing("iterations"))?;

        if !combined_nonce.starts_with(&self.nonce) {
            return Err(Error::Auth(
                "Server nonce doesn't start with client nonce".into(),
            ));
        }

        let salt = STANDARD
            .decode(salt_b64)
            .map_err(|e| Error::Auth(format!("Invalid salt: {}", e)))?;

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );

        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(client_key);

        // "biws" is base64("n,,")
        let without_proof = format!("c=biws,r={}", combined_nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            without_proof
        );

        let signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        self.salted_password = Some(salted_password);
        self.auth_message = Some(auth_message);

        Ok(format!("{},p={}", without_proof, STANDARD.encode(proof)))
    }

    /// Check the server signature in the server-final-message.
    pub fn verify_server_final(&self, server_final: &str) -> Result<()> {
        let signature_b64 = server_final
            .strip_prefix("v=")
            .ok_or_else(|| Error::Auth("Invalid server-final-message format".into()))?;
        let signature = STANDARD
            .decode(signature_b64)
            .map_err(|e| Error::Auth(format!("Invalid server signature: {}", e)))?;

        let (Some(salted_password), Some(auth_message)) =
            (self.salted_password.as_ref(), self.auth_message.as_ref())
        else {
            return Err(Error::Auth("server-final-message before server-first".into()));
        };

        let server_key = hmac_sha256(salted_password, b"Server Key")?;
        let expected = hmac_sha256(&server_key, auth_message.as_bytes())?;

        if signature.as_slice() != expected.as_slice() {
            return Err(Error::Auth("Server signature verification failed".into()));
        }
        Ok(())
    }
}
