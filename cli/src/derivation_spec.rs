//! JSON description of a derivation, accepted by the `derivation` subcommand.
//! Maps directly onto [`tvix_host::DerivationRequest`]; string values here
//! carry no context (they're plain JSON strings), so references between
//! derivations aren't expressible through this demonstration format — see
//! the crate-level note in `main.rs`.

use std::collections::BTreeMap;

use nix_compat::nixhash::NixHash;
use serde::Deserialize;
use tvix_host::{ContextString, DerivationRequest, FixedOutputSpec, OutputRequest};

#[derive(Deserialize)]
pub struct DerivationSpec {
    pub name: String,
    pub system: String,
    pub builder: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub outputs: Vec<OutputSpec>,
}

#[derive(Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(default)]
    pub fixed: Option<FixedSpec>,
}

#[derive(Deserialize)]
pub struct FixedSpec {
    /// `"flat"` or `"recursive"`.
    pub method: String,
    /// `algo:hexdigest`, e.g. `"sha256:abc123..."`.
    pub hash: String,
}

impl DerivationSpec {
    pub fn into_request(self) -> anyhow::Result<DerivationRequest> {
        let outputs = self
            .outputs
            .into_iter()
            .map(|o| -> anyhow::Result<OutputRequest> {
                let fixed = o
                    .fixed
                    .map(|f| -> anyhow::Result<FixedOutputSpec> {
                        let recursive = match f.method.as_str() {
                            "flat" => false,
                            "recursive" => true,
                            other => {
                                anyhow::bail!("unknown fixed-output method {other:?}")
                            }
                        };
                        let hash = NixHash::from_nix_hex_str(&f.hash)
                            .ok_or_else(|| anyhow::anyhow!("invalid hash {:?}", f.hash))?;
                        Ok(FixedOutputSpec { recursive, hash })
                    })
                    .transpose()?;
                Ok(OutputRequest {
                    name: o.name,
                    fixed,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(DerivationRequest {
            name: self.name,
            system: self.system,
            builder: ContextString::without_context(self.builder),
            args: self
                .args
                .into_iter()
                .map(ContextString::without_context)
                .collect(),
            env: self
                .env
                .into_iter()
                .map(|(k, v)| (k, ContextString::without_context(v)))
                .collect(),
            outputs,
        })
    }
}
