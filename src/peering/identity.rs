use sha2::{Digest, Sha256};

/// Order-independent identifier for a pair of virtual networks: the two ids
/// sorted lexicographically, joined with `:`, digested and truncated to 128
/// bits of hex. `peering_pair_id(a, b) == peering_pair_id(b, a)` for all
/// a, b.
pub fn peering_pair_id(vnet1_id: &str, vnet2_id: &str) -> String {
    let (first, second) = if vnet1_id <= vnet2_id {
        (vnet1_id, vnet2_id)
    } else {
        (vnet2_id, vnet1_id)
    };
    let digest = Sha256::digest(format!("{first}:{second}").as_bytes());
    hex::encode(&digest[..16])
}
