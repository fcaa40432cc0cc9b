//! Chain key derivation using HKDF

use hkdf::Hkdf;
use sha2::Sha256;

use super::distribution::DistributionId;

/// Label used for chain key derivation
const CHAIN_SEED_LABEL: &[u8] = b"sealcastSenderChainV1";

/// Derive the initial chain key for a sending epoch.
///
/// Binds the random epoch seed to its distribution id, so two epochs never
/// share a chain even if a seed were reused.
pub fn derive_chain_seed(epoch_seed: &[u8], distribution_id: &DistributionId) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(None, epoch_seed);

    // label || distribution_id
    let mut info = Vec::with_capacity(CHAIN_SEED_LABEL.len() + 16);
    info.extend_from_slice(CHAIN_SEED_LABEL);
    info.extend_from_slice(distribution_id.as_bytes());

    let mut seed = [0u8; 32];
    let Ok(()) = hkdf.expand(&info, &mut seed) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    seed
}
