//! Configuration fingerprints
//!
//! A workload only restarts when its own spec changes. Stamping a digest of
//! its config bundle onto the pod template turns a config-only edit into a
//! template change, which the Deployment controller rolls out.

use std::fmt::Write;

use aws_lc_rs::digest;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;

use open5gs_common::CONFIG_HASH_ANNOTATION;

// Section tags keep `data` and `binaryData` entries from colliding.
const TEXT_TAG: u8 = b't';
const BINARY_TAG: u8 = b'b';

/// Digest a config bundle's key/value content.
///
/// Entries are sorted by key and length-prefixed before hashing, so two
/// bundles with the same content produce the same hex SHA-256 digest however
/// they were built.
pub fn fingerprint(bundle: &ConfigMap) -> String {
    let mut text: Vec<(&str, &[u8])> = bundle
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.as_str(), v.as_bytes()))
        .collect();
    text.sort_by(|a, b| a.0.cmp(b.0));

    let mut binary: Vec<(&str, &[u8])> = bundle
        .binary_data
        .iter()
        .flatten()
        .map(|(k, v)| (k.as_str(), v.0.as_slice()))
        .collect();
    binary.sort_by(|a, b| a.0.cmp(b.0));

    let mut ctx = digest::Context::new(&digest::SHA256);
    for (tag, entries) in [(TEXT_TAG, &text), (BINARY_TAG, &binary)] {
        for (key, value) in entries {
            ctx.update(&[tag]);
            ctx.update(&(key.len() as u64).to_be_bytes());
            ctx.update(key.as_bytes());
            ctx.update(&(value.len() as u64).to_be_bytes());
            ctx.update(value);
        }
    }

    ctx.finish()
        .as_ref()
        .iter()
        .fold(String::with_capacity(64), |mut s, b| {
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Write `digest` into the workload's pod-template annotations
pub fn stamp(workload: &mut Deployment, digest: &str) {
    let Some(spec) = workload.spec.as_mut() else {
        return;
    };
    spec.template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(Default::default)
        .insert(CONFIG_HASH_ANNOTATION.to_string(), digest.to_string());
}

/// Fingerprint currently stamped on a workload, if any
pub fn stamped(workload: &Deployment) -> Option<&str> {
    workload
        .spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .annotations
        .as_ref()?
        .get(CONFIG_HASH_ANNOTATION)
        .map(String::as_str)
}
