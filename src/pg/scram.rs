//! SCRAM-SHA-256 authentication implementation.
//!
//! Implements RFC 5802 (SCRAM) and RFC 7677 (SCRAM-SHA-256) for PostgreSQL,
//! without channel binding.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// GS2 header for "no channel binding, no authzid", base64-encoded in the
/// client-final message as `c=biws`.
const GS2_HEADER: &str = "n,,";

/// SCRAM-SHA-256 client state machine.
pub struct ScramClient {
    password: String,
    client_nonce: String,
    client_first_bare: String,
    /// Set once the server-first message has been processed.
    verifier: Option<Verifier>,
}

/// What the client needs to check the server's final signature.
struct Verifier {
    salted_password: [u8; 32],
    auth_message: String,
}

impl ScramClient {
    /// Create a new SCRAM client with a random 18-byte nonce.
    pub fn new(username: &str, password: &str) -> Self {
        let nonce_bytes: [u8; 18] = rand::thread_rng().gen();
        Self::with_nonce(username, password, &BASE64.encode(nonce_bytes))
    }

    fn with_nonce(username: &str, password: &str, nonce: &str) -> Self {
        Self {
            password: password.to_string(),
            client_nonce: nonce.to_string(),
            client_first_bare: format!("n={},r={}", escape_username(username), nonce),
            verifier: None,
        }
    }

    /// The client-first message: `n,,n=<username>,r=<client-nonce>`.
    pub fn client_first_message(&self) -> Vec<u8> {
        format!("{}{}", GS2_HEADER, self.client_first_bare).into_bytes()
    }

    /// Process `r=<nonce>,s=<salt>,i=<iterations>` and produce the
    /// client-final message carrying the proof.
    pub fn process_server_first(&mut self, server_msg: &[u8]) -> Result<Vec<u8>, ScramError> {
        let server_first =
            std::str::from_utf8(server_msg).map_err(|_| ScramError::InvalidServerMessage)?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;

        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(BASE64.decode(value).map_err(|_| ScramError::InvalidSalt)?);
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = Some(
                    value
                        .parse::<u32>()
                        .ok()
                        .filter(|&n| n > 0)
                        .ok_or(ScramError::InvalidIterations)?,
                );
            }
        }

        let combined_nonce = nonce.ok_or(ScramError::MissingNonce)?;
        let salt = salt.ok_or(ScramError::MissingSalt)?;
        let iterations = iterations.ok_or(ScramError::MissingIterations)?;

        // The server extends our nonce; anything else is a replay or a bug.
        if !combined_nonce.starts_with(&self.client_nonce)
            || combined_nonce.len() == self.client_nonce.len()
        {
            return Err(ScramError::NonceVerificationFailed);
        }

        let salted_password = hi(&self.password, &salt, iterations)?;
        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = sha256(&client_key);

        let without_proof = format!("c={},r={}", BASE64.encode(GS2_HEADER), combined_nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, without_proof
        );

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;
        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(client_signature) {
            *p ^= s;
        }

        self.verifier = Some(Verifier {
            salted_password,
            auth_message,
        });

        Ok(format!("{},p={}", without_proof, BASE64.encode(proof)).into_bytes())
    }

    /// Check the server signature in `v=<verifier>`.
    pub fn verify_server_final(&self, server_msg: &[u8]) -> Result<(), ScramError> {
        let verifier = self.verifier.as_ref().ok_or(ScramError::InvalidState)?;

        let server_final =
            std::str::from_utf8(server_msg).map_err(|_| ScramError::InvalidServerMessage)?;
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(ScramError::ServerRejected(err.to_string()));
        }

        let signature = server_final
            .strip_prefix("v=")
            .and_then(|v| BASE64.decode(v).ok())
            .ok_or(ScramError::InvalidServerSignature)?;

        let server_key = hmac_sha256(&verifier.salted_password, b"Server Key")?;
        let expected = hmac_sha256(&server_key, verifier.auth_message.as_bytes())?;

        if signature != expected {
            return Err(ScramError::ServerSignatureVerificationFailed);
        }
        Ok(())
    }
}

/// SCRAM authentication errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScramError {
    InvalidServerMessage,
    InvalidSalt,
    InvalidIterations,
    MissingNonce,
    MissingSalt,
    MissingIterations,
    NonceVerificationFailed,
    InvalidServerSignature,
    ServerSignatureVerificationFailed,
    ServerRejected(String),
    InvalidState,
    Crypto,
}

impl std::fmt::Display for ScramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidServerMessage => write!(f, "Invalid server message"),
            Self::InvalidSalt => write!(f, "Invalid salt encoding"),
            Self::InvalidIterations => write!(f, "Invalid iteration count"),
            Self::MissingNonce => write!(f, "Missing nonce in server message"),
            Self::MissingSalt => write!(f, "Missing salt in server message"),
            Self::MissingIterations => write!(f, "Missing iterations in server message"),
            Self::NonceVerificationFailed => write!(f, "Server nonce verification failed"),
            Self::InvalidServerSignature => write!(f, "Invalid server signature"),
            Self::ServerSignatureVerificationFailed => {
                write!(f, "Server signature verification failed")
            }
            Self::ServerRejected(e) => write!(f, "Server rejected authentication: {}", e),
            Self::InvalidState => write!(f, "Invalid SCRAM state"),
            Self::Crypto => write!(f, "Key derivation failed"),
        }
    }
}

impl std::error::Error for ScramError {}

// ============================================================================
// Helper Functions
// ============================================================================

/// Hi() from RFC 5802: PBKDF2 with HMAC-SHA-256.
fn hi(password: &str, salt: &[u8], iterations: u32) -> Result<[u8; 32], ScramError> {
    let mut output = [0u8; 32];
    pbkdf2::pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut output)
        .map_err(|_| ScramError::Crypto)?;
    Ok(output)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], ScramError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| ScramError::Crypto)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// `=` and `,` must be escaped in the SASL username. PostgreSQL takes the
/// user from the startup message, so no further SASLprep is applied.
fn escape_username(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}
