//! Protocol limits and identifiers.

/// Protocol version advertised in key packages.
pub const PROTOCOL_VERSION: u8 = 1;

/// The single cipher suite: X25519, XChaCha20-Poly1305, SHA-256, Ed25519.
pub const CIPHER_SUITE: u16 = 0x0001;

/// Maximum epoch number. A commit that would advance past it is rejected.
pub const MAX_EPOCH: u64 = 1_000_000;

/// Maximum number of members in one group.
pub const MAX_MEMBERS: usize = 256;

/// Maximum number of ratchet generations a receiver skips for one message.
pub const MAX_RATCHET_SKIP: u32 = dmls_crypto::MAX_SKIP;

/// Upper bound for `retention_epochs`.
pub const MAX_RETENTION_EPOCHS: u32 = 16;

/// Default key package lifetime (90 days).
pub const DEFAULT_KEY_PACKAGE_LIFETIME_SECS: u64 = 90 * 24 * 60 * 60;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_sane() {
        assert!(MAX_EPOCH > 1000);
        assert!(MAX_MEMBERS >= 3);
        assert!(MAX_RETENTION_EPOCHS >= 1);
        assert_eq!(DEFAULT_KEY_PACKAGE_LIFETIME_SECS, 7_776_000);
    }
}
