//! Token signer/verifier (component C): short-lived Ed25519-signed claims,
//! in a compact JWT-equivalent shape (`base64(header).base64(payload).base64(sig)`,
//! `alg=EdDSA`, headers carry `kid`).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const TOKEN_TTL_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub jti: String,
    /// Priority-tier claim (0-3) carried by API-key tokens for
    /// `/v2/priority/nearest`; absent on Locate-issued and monitoring tokens.
    #[serde(default)]
    pub tier: Option<u8>,
}

#[derive(Serialize, Deserialize)]
struct Header<'a> {
    alg: &'a str,
    kid: String,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("unknown signing key")]
    UnknownKey,
    #[error("bad signature")]
    BadSignature,
    #[error("expired")]
    Expired,
    #[error("wrong issuer or audience")]
    WrongClaims,
}

/// Mints tokens with a single active signing key, identified by `kid`.
pub struct TokenSigner {
    kid: String,
    key: SigningKey,
}

impl TokenSigner {
    pub fn new(kid: impl Into<String>, key: SigningKey) -> Self {
        Self { kid: kid.into(), key }
    }

    /// Issues a fresh token for `claims`, stamping a new `jti` and an
    /// `exp` 60s out regardless of whatever the caller put in those fields.
    pub fn sign(&self, iss: &str, sub: &str, aud: &str) -> (String, Claims) {
        let claims = Claims {
            iss: iss.to_string(),
            sub: sub.to_string(),
            aud: aud.to_string(),
            exp: now_secs() + TOKEN_TTL_SECS,
            jti: uuid::Uuid::new_v4().to_string(),
            tier: None,
        };
        (self.encode(&claims), claims)
    }

    fn encode(&self, claims: &Claims) -> String {
        let header = Header {
            alg: "EdDSA",
            kid: self.kid.clone(),
        };
        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).expect("header serializes"));
        let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).expect("claims serialize"));
        let signing_input = format!("{header_b64}.{claims_b64}");
        let sig: Signature = self.key.sign(signing_input.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(sig.to_bytes());
        format!("{signing_input}.{sig_b64}")
    }
}

/// Verifies tokens against a set of public keys, keyed by `kid`, so the
/// current and next key can both validate during rotation.
#[derive(Clone)]
pub struct TokenVerifier {
    keys: std::collections::HashMap<String, VerifyingKey>,
}

impl TokenVerifier {
    pub fn new(keys: impl IntoIterator<Item = (String, VerifyingKey)>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// Verifies structure, signature, and expiry. Does not check `iss`/`aud` —
    /// callers apply those constraints themselves since they differ between
    /// the Locate-issued and monitoring-issued cases.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let (header_b64, claims_b64, sig_b64) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(c), Some(s), None) => (h, c, s),
            _ => return Err(TokenError::Malformed),
        };

        let header_bytes = URL_SAFE_NO_PAD.decode(header_b64).map_err(|_| TokenError::Malformed)?;
        let header: Header = serde_json::from_slice(&header_bytes).map_err(|_| TokenError::Malformed)?;

        let key = self.keys.get(&header.kid).ok_or(TokenError::UnknownKey)?;

        let sig_bytes = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| TokenError::Malformed)?;
        let sig_bytes: [u8; 64] = sig_bytes.try_into().map_err(|_| TokenError::Malformed)?;
        let sig = Signature::from_bytes(&sig_bytes);

        let signing_input = format!("{header_b64}.{claims_b64}");
        key.verify(signing_input.as_bytes(), &sig)
            .map_err(|_| TokenError::BadSignature)?;

        let claims_bytes = URL_SAFE_NO_PAD.decode(claims_b64).map_err(|_| TokenError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&claims_bytes).map_err(|_| TokenError::Malformed)?;

        if claims.exp < now_secs() {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    /// Verifies a monitoring-audience token: `iss="monitoring"`,
    /// `aud` must contain `"locate"`, and the subject must parse as a fleet
    /// hostname (checked by the caller via `crate::fleet::model::parse_hostname`).
    pub fn verify_monitoring(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.verify(token)?;
        if claims.iss != "monitoring" || !claims.aud.contains("locate") {
            return Err(TokenError::WrongClaims);
        }
        Ok(claims)
    }
}
