// src/identity.rs
// Deterministic conversation/continuation identifiers (§4.D).
//
// Grounded on the teacher's `router/mod.rs` use of `parking_lot::RwLock` for
// a purely synchronous, read-heavy shared table (there: `RoutingStats`; here:
// the conversation-id memo). MD5 is used exactly as the upstream expects,
// not as a cryptographic primitive.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;

/// Incoming headers relevant to identity derivation, already lowercased by
/// the embedding HTTP layer's header map (out of scope here; the core only
/// reads by name).
pub struct IdentityHeaders<'a> {
    pub conversation_id: Option<&'a str>,
    pub agent_continuation_id: Option<&'a str>,
    pub forwarded_for: Option<&'a str>,
    pub real_ip: Option<&'a str>,
    pub remote_addr: &'a str,
    pub user_agent: &'a str,
}

/// Client IP resolution priority: `X-Forwarded-For` > `X-Real-IP` > remote
/// address (§4.D).
fn client_ip(headers: &IdentityHeaders) -> String {
    if let Some(forwarded) = headers.forwarded_for {
        if let Some(first) = forwarded.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.real_ip {
        if !real_ip.trim().is_empty() {
            return real_ip.trim().to_string();
        }
    }
    headers.remote_addr.to_string()
}

fn hour_bucket() -> String {
    Utc::now().format("%Y%m%d%H").to_string()
}

fn fingerprint(headers: &IdentityHeaders) -> String {
    format!(
        "{}|{}|{}",
        client_ip(headers),
        headers.user_agent,
        hour_bucket()
    )
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// `conv-` + hex of the first 8 bytes of MD5(fingerprint) (§4.D).
fn derive_conversation_id(fingerprint: &str) -> String {
    let digest = md5::compute(fingerprint.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in &digest.0[..8] {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("conv-{hex}")
}

/// MD5("agent|" + fingerprint) reinterpreted as a UUID with version nibble
/// forced to 5 and variant bits forced to RFC 4122 (§4.D).
fn derive_agent_continuation_id(fingerprint: &str) -> String {
    let mut bytes = md5::compute(format!("agent|{fingerprint}").as_bytes()).0;
    bytes[6] = (bytes[6] & 0x0F) | 0x50; // version 5
    bytes[8] = (bytes[8] & 0x3F) | 0x80; // variant RFC 4122
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        bytes[6], bytes[7],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    )
}

/// Process-wide memo table amortizing the MD5 hash across requests sharing
/// an (IP, UA, hour bucket) fingerprint. Entries never expire individually
/// (§9 open question: no TTL is mandated; `invalidate_all` is the only bulk
/// operation the source provides).
#[derive(Default)]
pub struct IdentityGenerator {
    memo: RwLock<HashMap<String, String>>,
}

pub struct Identity {
    pub conversation_id: String,
    pub agent_continuation_id: String,
}

impl IdentityGenerator {
    pub fn new() -> Self {
        Self {
            memo: RwLock::new(HashMap::new()),
        }
    }

    pub fn generate(&self, headers: &IdentityHeaders) -> Identity {
        let fp = fingerprint(headers);

        let conversation_id = match headers.conversation_id {
            Some(provided) if !provided.is_empty() => provided.to_string(),
            _ => self.memoized_conversation_id(&fp),
        };

        let agent_continuation_id = match headers.agent_continuation_id {
            Some(provided) if !provided.is_empty() => provided.to_string(),
            _ => derive_agent_continuation_id(&fp),
        };

        Identity {
            conversation_id,
            agent_continuation_id,
        }
    }

    fn memoized_conversation_id(&self, fingerprint: &str) -> String {
        if let Some(cached) = self.memo.read().get(fingerprint) {
            return cached.clone();
        }
        let mut memo = self.memo.write();
        if let Some(cached) = memo.get(fingerprint) {
            return cached.clone();
        }
        let id = derive_conversation_id(fingerprint);
        memo.insert(fingerprint.to_string(), id.clone());
        id
    }

    /// Bulk-invalidate the memo table. The source provides no individual-entry
    /// TTL (§9 open question); this is the one eviction primitive it has.
    pub fn invalidate_all(&self) {
        self.memo.write().clear();
    }
}
