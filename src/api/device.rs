// Dramabox Core - REST facade over the Dramabox mobile API
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Device identity and request signing
//!
//! Every token is minted for a freshly generated fake Android device. The
//! identity is immutable for the life of that token and is replayed in the
//! headers of each request made with it.
//!
//! # Signature
//! The upstream verifies an `sn` header computed over
//! `timestamp + body + deviceId + androidId [+ tn]`, concatenated as UTF-8
//! with no separators. The digest is HMAC-SHA256 keyed with the configured
//! secret, base64 encoded.

use crate::config::AppProfile;
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Spoofed device fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    /// Random v4 UUID (`device-id` header)
    pub device_id: String,
    /// 16 lowercase hex digits (`android-id` header)
    pub android_id: String,
    /// Dotted-quad address replayed in forwarding headers
    pub spoofed_ip: String,
}

impl DeviceIdentity {
    /// Generate a new random identity
    ///
    /// No external calls; never fails.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();

        let android_bytes: [u8; 8] = rng.gen();
        let spoofed_ip = format!(
            "{}.{}.{}.{}",
            rng.gen_range(1..=223u8),
            rng.gen::<u8>(),
            rng.gen::<u8>(),
            rng.gen_range(1..=254u8)
        );

        Self {
            device_id: Uuid::new_v4().to_string(),
            android_id: hex::encode(android_bytes),
            spoofed_ip,
        }
    }
}

/// Headers every upstream call carries for a given identity
///
/// Callers add the signature (`sn`) and, for authenticated calls, the bearer
/// token (`tn`) and user id on top of this set.
pub fn device_headers(profile: &AppProfile, identity: &DeviceIdentity, language: &str) -> BTreeMap<String, String> {
    let pairs = [
        ("version", profile.version_code.as_str()),
        ("vn", profile.version_name.as_str()),
        ("cid", profile.channel_id.as_str()),
        ("package-name", profile.package_name.as_str()),
        ("apn", "1"),
        ("p", profile.platform.as_str()),
        ("time-zone", profile.time_zone.as_str()),
        ("user-agent", profile.user_agent.as_str()),
        ("md", profile.device_model.as_str()),
        ("ov", profile.os_version.as_str()),
        ("content-type", "application/json; charset=UTF-8"),
        ("device-id", identity.device_id.as_str()),
        ("android-id", identity.android_id.as_str()),
        ("x-forwarded-for", identity.spoofed_ip.as_str()),
        ("x-real-ip", identity.spoofed_ip.as_str()),
        ("language", language),
        ("current-language", language),
    ];

    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// Keyed signer for request material
#[derive(Clone)]
pub struct Signer {
    secret: Vec<u8>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("secret", &"****").finish()
    }
}

impl Signer {
    pub fn new<S: AsRef<[u8]>>(secret: S) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Assemble the signing material in upstream order
    pub fn material(timestamp: &str, body: &str, identity: &DeviceIdentity, token_header: Option<&str>) -> String {
        let mut material = String::with_capacity(
            timestamp.len() + body.len() + identity.device_id.len() + identity.android_id.len() + 64,
        );
        material.push_str(timestamp);
        material.push_str(body);
        material.push_str(&identity.device_id);
        material.push_str(&identity.android_id);
        if let Some(token) = token_header {
            material.push_str(token);
        }
        material
    }

    /// Deterministic keyed digest of `material`
    pub fn sign(&self, material: &str) -> String {
        // HMAC accepts keys of any length, so construction cannot fail
        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(material.as_bytes());
        general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Sign a request in one step
    pub fn sign_request(
        &self,
        timestamp: &str,
        body: &str,
        identity: &DeviceIdentity,
        token_header: Option<&str>,
    ) -> String {
        self.sign(&Self::material(timestamp, body, identity, token_header))
    }
}

/// Mask a secret for safe logging
///
/// Shows first 2 and last 2 characters, replaces middle with asterisks
pub fn mask(s: &str) -> String {
    if s.is_empty() {
        "[empty]".to_string()
    } else if s.chars().count() <= 4 {
        "****".to_string()
    } else {
        let chars: Vec<char> = s.chars().collect();
        let first_two: String = chars.iter().take(2).collect();
        let last_two: String = chars.iter().skip(chars.len() - 2).collect();
        format!("{}{}{}", first_two, "*".repeat(chars.len() - 4), last_two)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn fixed_identity() -> DeviceIdentity {
        DeviceIdentity {
            device_id: "6f1c1f0e-1111-4222-8333-944455556666".to_string(),
            android_id: "ffffffff9a8b7c6d".to_string(),
            spoofed_ip: "10.1.2.3".to_string(),
        }
    }

    #[test]
    fn test_identity_format() {
        let identity = DeviceIdentity::generate();

        assert!(Uuid::parse_str(&identity.device_id).is_ok());
        assert_eq!(identity.android_id.len(), 16);
        assert!(identity.android_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(identity.spoofed_ip.parse::<Ipv4Addr>().is_ok());
    }

    #[test]
    fn test_identity_uniqueness() {
        let a = DeviceIdentity::generate();
        let b = DeviceIdentity::generate();
        assert_ne!(a.device_id, b.device_id);
    }

    #[test]
    fn test_material_order() {
        let identity = fixed_identity();
        let material = Signer::material("1700000000000", "{\"a\":1}", &identity, Some("Bearer t"));
        assert_eq!(
            material,
            "1700000000000{\"a\":1}6f1c1f0e-1111-4222-8333-944455556666ffffffff9a8b7c6dBearer t"
        );

        let without_token = Signer::material("1", "{}", &identity, None);
        assert!(without_token.ends_with(&identity.android_id));
    }

    #[test]
    fn test_sign_is_deterministic() {
        let signer = Signer::new("secret");
        let identity = fixed_identity();

        let a = signer.sign_request("1", "{}", &identity, None);
        let b = signer.sign_request("1", "{}", &identity, None);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_sign_depends_on_key_and_input() {
        let identity = fixed_identity();
        let a = Signer::new("secret").sign_request("1", "{}", &identity, None);
        let b = Signer::new("other").sign_request("1", "{}", &identity, None);
        let c = Signer::new("secret").sign_request("2", "{}", &identity, None);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_device_headers_replay_identity() {
        let identity = fixed_identity();
        let headers = device_headers(&AppProfile::default(), &identity, "en");

        assert_eq!(headers["device-id"], identity.device_id);
        assert_eq!(headers["android-id"], identity.android_id);
        assert_eq!(headers["x-forwarded-for"], "10.1.2.3");
        assert_eq!(headers["language"], "en");
        assert_eq!(headers["vn"], "4.3.0");
        assert!(!headers.contains_key("tn"));
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask(""), "[empty]");
        assert_eq!(mask("abcd"), "****");
        assert_eq!(mask("abcdefgh"), "ab****gh");
    }
}
