//! Shared helpers: vector math, deterministic key hashing, URL redaction,
//! document pruning, and offset page tokens.

use anyhow::{anyhow, Result};
use base64::Engine;
use sha2::{Digest, Sha256};

/// Cosine similarity between two f32 vectors. Returns 0.0 for zero-norm or
/// mismatched-length inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        norm_a += (*x as f64).powi(2);
        norm_b += (*y as f64).powi(2);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Element-wise arithmetic mean. None when the input is empty; vectors of
/// mismatched length are skipped.
pub fn mean_vector(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let dim = vectors.first()?.len();
    let mut sum = vec![0.0f64; dim];
    let mut count = 0usize;
    for v in vectors {
        if v.len() != dim {
            continue;
        }
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += *x as f64;
        }
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(sum.iter().map(|x| (x / count as f64) as f32).collect())
}

/// First 12 hex chars of SHA-256. Used for category ids and series-id tails.
pub fn hash12(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..12].to_string()
}

/// Query parameters that carry credentials. Values are replaced before a
/// fetched URL is attached to breadcrumbs.
const SECRET_PARAMS: &[&str] = &["key", "token", "apikey", "api_key", "access_token", "signature"];

/// Replace secret query-parameter values with `REDACTED`. Unparseable URLs
/// pass through untouched.
pub fn redact_url(url: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url) else {
        return url.to_string();
    };
    if parsed.query().is_none() {
        return url.to_string();
    }

    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| {
            if SECRET_PARAMS.contains(&k.to_lowercase().as_str()) {
                (k.into_owned(), "REDACTED".to_string())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();

    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    parsed.to_string()
}

/// Recursively strip `null` members from JSON objects. Array elements are
/// kept (position matters); nested objects inside arrays are pruned.
pub fn prune_nulls_deep(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, prune_nulls_deep(v)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(prune_nulls_deep).collect())
        }
        other => other,
    }
}

/// Offset pagination token: base64 of the decimal offset.
pub fn encode_page_token(offset: usize) -> String {
    base64::engine::general_purpose::STANDARD.encode(offset.to_string())
}

/// Decode an offset token. Errors on anything that is not base64 of a
/// non-negative integer.
pub fn decode_page_token(token: &str) -> Result<usize> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(token)
        .map_err(|_| anyhow!("invalid page token"))?;
    let text = String::from_utf8(bytes).map_err(|_| anyhow!("invalid page token"))?;
    let offset: i64 = text.trim().parse().map_err(|_| anyhow!("invalid page token"))?;
    if offset < 0 {
        return Err(anyhow!("invalid page token"));
    }
    Ok(offset as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical() {
        let a = vec![1.0f32, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_orthogonal_and_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        let z = vec![0.0f32, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
        assert!(cosine_similarity(&a, &z).abs() < 1e-9);
    }

    #[test]
    fn cosine_mismatched_lengths() {
        let a = vec![1.0f32, 0.0];
        let b = vec![1.0f32];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn mean_vector_averages() {
        let vs = vec![vec![1.0f32, 3.0], vec![3.0f32, 5.0]];
        assert_eq!(mean_vector(&vs), Some(vec![2.0f32, 4.0]));
    }

    #[test]
    fn mean_vector_empty_is_none() {
        assert_eq!(mean_vector(&[]), None);
    }

    #[test]
    fn hash12_deterministic() {
        assert_eq!(hash12("host:yoga"), hash12("host:yoga"));
        assert_ne!(hash12("host:yoga"), hash12("host:pilates"));
        assert_eq!(hash12("x").len(), 12);
    }

    #[test]
    fn redact_url_hides_secrets() {
        let url = "https://api.example.com/cal?key=sk-secret&singleEvents=true";
        let clean = redact_url(url);
        assert!(!clean.contains("sk-secret"));
        assert!(clean.contains("key=REDACTED"));
        assert!(clean.contains("singleEvents=true"));
    }

    #[test]
    fn redact_url_passes_clean() {
        let url = "https://example.com/events?page=2";
        assert_eq!(redact_url(url), url);
    }

    #[test]
    fn prune_nulls_recurses() {
        let v = serde_json::json!({
            "a": null,
            "b": { "c": null, "d": 1 },
            "e": [ { "f": null, "g": 2 } ]
        });
        let pruned = prune_nulls_deep(v);
        assert_eq!(
            pruned,
            serde_json::json!({ "b": { "d": 1 }, "e": [ { "g": 2 } ] })
        );
    }

    #[test]
    fn page_token_round_trip() {
        let token = encode_page_token(40);
        assert_eq!(decode_page_token(&token).unwrap(), 40);
    }

    #[test]
    fn page_token_rejects_garbage() {
        assert!(decode_page_token("!!!").is_err());
        assert!(decode_page_token("bm90LWEtbnVtYmVy").is_err()); // "not-a-number"
        let negative = base64::engine::general_purpose::STANDARD.encode("-5");
        assert!(decode_page_token(&negative).is_err());
    }
}
