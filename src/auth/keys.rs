use arc_swap::ArcSwap;
use jsonwebtoken::DecodingKey;
use std::collections::HashMap;
use std::sync::Arc;

/// Default key id used when tokens carry no `kid` header.
const DEFAULT_KID: &str = "default";

/// The set of signing keys the validator currently trusts.
///
/// Key generation and rotation happen in an external service; callers swap
/// in a fresh map when the trusted set changes. Reads are lock-free so the
/// hot validation path never contends with a rotation.
pub struct TrustedKeys {
    keys: ArcSwap<HashMap<String, DecodingKey>>,
}

impl TrustedKeys {
    /// Builds a key set holding a single HS256 secret under the default kid.
    pub fn hs256(secret: &[u8]) -> Self {
        let mut keys = HashMap::new();
        keys.insert(DEFAULT_KID.to_string(), DecodingKey::from_secret(secret));
        TrustedKeys {
            keys: ArcSwap::from_pointee(keys),
        }
    }

    /// Replaces the trusted set wholesale.
    pub fn replace(&self, keys: HashMap<String, DecodingKey>) {
        self.keys.store(Arc::new(keys));
    }

    /// Looks up the key for a token's `kid`, falling back to the default
    /// entry when the header carries none.
    pub fn get(&self, kid: Option<&str>) -> Option<DecodingKey> {
        let keys = self.keys.load();
        keys.get(kid.unwrap_or(DEFAULT_KID)).cloned()
    }
}
