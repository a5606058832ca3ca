//! Signed session tokens issued by an upstream login step.
//!
//! A token binds an account and character to an issue and expiry time and is
//! authenticated with HMAC-SHA-256 under a secret shared between the login
//! service and every zone server.
//!
//! Alongside the token the login step hands the client a session secret,
//! an HMAC of the token's fields under the same shared secret. Zone servers
//! recompute it; it never crosses a game connection, and the envelope key
//! is derived from it.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::codec::{PacketReader, PacketWriter};
use crate::error::ProtocolResult;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_BYTES: usize = 32;

/// Wire size of an encoded token.
pub const TOKEN_BYTES: usize = 8 * 4 + SIGNATURE_BYTES;

pub const SESSION_SECRET_BYTES: usize = 32;
const SESSION_SECRET_LABEL: &[u8] = b"realm-session-key";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub account_id: u64,
    pub character_id: u64,
    pub issued_at_ms: u64,
    pub expires_at_ms: u64,
    pub signature: [u8; SIGNATURE_BYTES],
}

impl SessionToken {
    fn signed_fields(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0..8].copy_from_slice(&self.account_id.to_le_bytes());
        out[8..16].copy_from_slice(&self.character_id.to_le_bytes());
        out[16..24].copy_from_slice(&self.issued_at_ms.to_le_bytes());
        out[24..32].copy_from_slice(&self.expires_at_ms.to_le_bytes());
        out
    }

    pub fn write(&self, writer: &mut PacketWriter) {
        writer.write_u64_le(self.account_id);
        writer.write_u64_le(self.character_id);
        writer.write_u64_le(self.issued_at_ms);
        writer.write_u64_le(self.expires_at_ms);
        writer.write_bytes(&self.signature);
    }

    pub fn read(reader: &mut PacketReader<'_>) -> ProtocolResult<Self> {
        Ok(Self {
            account_id: reader.read_u64_le()?,
            character_id: reader.read_u64_le()?,
            issued_at_ms: reader.read_u64_le()?,
            expires_at_ms: reader.read_u64_le()?,
            signature: reader.read_array::<SIGNATURE_BYTES>()?,
        })
    }

    /// True once `now_ms` has reached the expiry timestamp.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Credentials the login step hands a client for one session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub token: SessionToken,
    pub secret: [u8; SESSION_SECRET_BYTES],
}

impl std::fmt::Debug for SessionGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGrant")
            .field("token", &self.token)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token signature does not verify")]
    InvalidSignature,
    #[error("token expired at {expires_at_ms}, now {now_ms}")]
    Expired { expires_at_ms: u64, now_ms: u64 },
    #[error("token age {age_ms}ms exceeds ttl {ttl_ms}ms")]
    TooOld { age_ms: u64, ttl_ms: u64 },
    #[error("token issued in the future ({issued_at_ms} > {now_ms})")]
    NotYetValid { issued_at_ms: u64, now_ms: u64 },
    #[error("token secret is unusable")]
    InvalidKey,
}

/// Signs and verifies [`SessionToken`]s with a shared secret.
#[derive(Clone)]
pub struct TokenAuthority {
    secret: Vec<u8>,
    /// Tolerated clock skew between the issuer and this server.
    skew_ms: u64,
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("secret", &"<redacted>")
            .field("skew_ms", &self.skew_ms)
            .finish()
    }
}

impl TokenAuthority {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            skew_ms: 5_000,
        }
    }

    pub fn with_skew(mut self, skew_ms: u64) -> Self {
        self.skew_ms = skew_ms;
        self
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::InvalidKey)
    }

    pub fn issue(
        &self,
        account_id: u64,
        character_id: u64,
        issued_at_ms: u64,
        lifetime_ms: u64,
    ) -> Result<SessionToken, TokenError> {
        let mut token = SessionToken {
            account_id,
            character_id,
            issued_at_ms,
            expires_at_ms: issued_at_ms.saturating_add(lifetime_ms),
            signature: [0u8; SIGNATURE_BYTES],
        };
        let mut mac = self.mac()?;
        mac.update(&token.signed_fields());
        token.signature.copy_from_slice(&mac.finalize().into_bytes());
        Ok(token)
    }

    /// Issues a token together with its session secret.
    pub fn grant(
        &self,
        account_id: u64,
        character_id: u64,
        issued_at_ms: u64,
        lifetime_ms: u64,
    ) -> Result<SessionGrant, TokenError> {
        let token = self.issue(account_id, character_id, issued_at_ms, lifetime_ms)?;
        let secret = self.session_secret(&token)?;
        Ok(SessionGrant { token, secret })
    }

    /// The secret bound to `token`. Only holders of the shared secret can
    /// compute it.
    pub fn session_secret(&self, token: &SessionToken) -> Result<[u8; SESSION_SECRET_BYTES], TokenError> {
        let mut mac = self.mac()?;
        mac.update(SESSION_SECRET_LABEL);
        mac.update(&token.signed_fields());
        let mut secret = [0u8; SESSION_SECRET_BYTES];
        secret.copy_from_slice(&mac.finalize().into_bytes());
        Ok(secret)
    }

    /// Checks signature, expiry and age against `ttl_ms`.
    ///
    /// The signature is checked first so an attacker learns nothing about
    /// timing rules from a forged token.
    pub fn verify(&self, token: &SessionToken, now_ms: u64, ttl_ms: u64) -> Result<(), TokenError> {
        let mut mac = self.mac()?;
        mac.update(&token.signed_fields());
        mac.verify_slice(&token.signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        if token.is_expired(now_ms) {
            return Err(TokenError::Expired {
                expires_at_ms: token.expires_at_ms,
                now_ms,
            });
        }
        if token.issued_at_ms > now_ms.saturating_add(self.skew_ms) {
            return Err(TokenError::NotYetValid {
                issued_at_ms: token.issued_at_ms,
                now_ms,
            });
        }
        let age_ms = now_ms.saturating_sub(token.issued_at_ms);
        if age_ms > ttl_ms {
            return Err(TokenError::TooOld { age_ms, ttl_ms });
        }
        Ok(())
    }
}
