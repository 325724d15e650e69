//! P-256 key material for the provisioning ECDH.
//!
//! The device speaks raw encodings only: a 32-byte scalar for the
//! private key and the 64-byte uncompressed `X||Y` (no SEC1 header) for
//! the public key. The shared secret is the 32-byte x-coordinate,
//! passed opaquely back to the device.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};

use crate::error::{Error, Result};

/// Raw keypair as the device consumes it.
pub struct Keypair {
    pub private: [u8; 32],
    pub public: [u8; 64],
}

/// Fresh P-256 keypair; one per provisioning session.
pub fn generate_keypair() -> Keypair {
    let secret = SecretKey::random(&mut rand::rngs::OsRng);
    let public = secret.public_key().to_encoded_point(false);

    let mut private = [0_u8; 32];
    private.copy_from_slice(&secret.to_bytes());

    // Skip the 0x04 uncompressed-point tag.
    let mut public_raw = [0_u8; 64];
    public_raw.copy_from_slice(&public.as_bytes()[1..]);

    Keypair {
        private,
        public: public_raw,
    }
}

/// ECDH shared secret from our raw private key and the peer's raw
/// public key.
pub fn shared_secret(private: &[u8; 32], peer_public: &[u8; 64]) -> Result<[u8; 32]> {
    let secret =
        SecretKey::from_slice(private).map_err(|_| Error::Provisioning("invalid private key"))?;

    let mut sec1 = [0_u8; 65];
    sec1[0] = 0x04;
    sec1[1..].copy_from_slice(peer_public);
    let peer = PublicKey::from_sec1_bytes(&sec1)
        .map_err(|_| Error::Provisioning("peer public key not on curve"))?;

    let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
    let mut out = [0_u8; 32];
    out.copy_from_slice(shared.raw_secret_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdh_agrees_between_peers() {
        let a = generate_keypair();
        let b = generate_keypair();

        let ab = shared_secret(&a.private, &b.public).unwrap();
        let ba = shared_secret(&b.private, &a.public).unwrap();
        assert_eq!(ab, ba);
        assert_ne!(ab, [0; 32]);
    }

    #[test]
    fn fresh_keypairs_differ() {
        let a = generate_keypair();
        let b = generate_keypair();
        assert_ne!(a.private, b.private);
        assert_ne!(a.public, b.public);
    }

    #[test]
    fn garbage_peer_key_is_rejected() {
        let a = generate_keypair();
        assert!(shared_secret(&a.private, &[0xFF; 64]).is_err());
    }
}
