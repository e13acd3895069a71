use mooring_core::Method;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use sha2::{Digest, Sha256};

use crate::{Challenge, Credentials, DigestAlgorithm, Qop};

/// Computes Authorization header values from challenges.
///
/// Holds the nonce-count so that consecutive answers against the same nonce
/// (e.g. keepalive probes re-using cached credentials) carry increasing `nc`.
#[derive(Debug, Default)]
pub struct DigestResponder {
    nc: u32,
}

impl DigestResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates the Authorization/Proxy-Authorization header value answering
    /// the given challenge with the given credentials.
    pub fn authorization_for(
        &mut self,
        creds: &Credentials,
        challenge: &Challenge,
        method: &Method,
        uri: &str,
    ) -> String {
        self.nc += 1;
        let nc_str = format!("{:08x}", self.nc);
        let cnonce: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();

        let ha1_input = format!("{}:{}:{}", creds.username, challenge.realm, creds.secret);
        let ha1 = hash(challenge.algorithm, ha1_input.as_bytes());

        let ha2_input = format!("{}:{}", method.as_str(), uri);
        let ha2 = hash(challenge.algorithm, ha2_input.as_bytes());

        let response = match challenge.qop {
            Some(qop) => {
                let final_input = format!(
                    "{}:{}:{}:{}:{}:{}",
                    ha1,
                    challenge.nonce,
                    nc_str,
                    cnonce,
                    qop.as_str(),
                    ha2
                );
                hash(challenge.algorithm, final_input.as_bytes())
            }
            None => {
                let final_input = format!("{}:{}:{}", ha1, challenge.nonce, ha2);
                hash(challenge.algorithm, final_input.as_bytes())
            }
        };

        let mut auth = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm={}",
            creds.username,
            challenge.realm,
            challenge.nonce,
            uri,
            response,
            challenge.algorithm.as_str()
        );

        if let Some(qop) = challenge.qop {
            auth.push_str(&format!(
                ", qop={}, nc={}, cnonce=\"{}\"",
                qop.as_str(),
                nc_str,
                cnonce
            ));
        }

        if let Some(opaque) = &challenge.opaque {
            auth.push_str(&format!(", opaque=\"{}\"", opaque));
        }

        auth
    }
}

fn hash(algorithm: DigestAlgorithm, data: &[u8]) -> String {
    match algorithm {
        DigestAlgorithm::Md5 => format!("{:x}", md5::compute(data)),
        DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
    }
}
