//! Security invariant tests for the x402 paygate workspace.
//!
//! These tests verify that critical security properties hold across the codebase.
//! They run on every `cargo test --workspace` invocation, ensuring that future
//! changes don't accidentally regress security posture.

use regex::Regex;
use std::path::Path;
use walkdir::WalkDir;

/// Read all .rs source files from production crates (excluding tests and this crate).
fn production_source_files() -> Vec<(String, String)> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap();

    let crates_dir = root.join("crates");
    let mut files = Vec::new();

    for entry in WalkDir::new(&crates_dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) != Some("rs") {
            continue;
        }

        // Skip this crate itself
        if path
            .to_str()
            .map(|s| s.contains("security-audit"))
            .unwrap_or(false)
        {
            continue;
        }

        let path_str = path.to_str().unwrap_or("");
        if path_str.contains("tests/") || path_str.contains("\\tests\\") {
            continue;
        }

        if let Ok(content) = std::fs::read_to_string(path) {
            files.push((path_str.to_string(), content));
        }
    }

    files
}

/// Filter to only lines outside of `#[cfg(test)]` modules and `mod tests` blocks.
/// This is a heuristic: it removes everything after `#[cfg(test)]` in a file.
fn production_lines(content: &str) -> String {
    let mut result = Vec::new();
    let mut in_test_module = false;

    for line in content.lines() {
        if line.contains("#[cfg(test)]") || line.trim().starts_with("mod tests") {
            in_test_module = true;
        }
        if !in_test_module {
            result.push(line);
        }
    }

    result.join("\n")
}

/// Source of the production file whose path ends with `suffix`.
fn production_file(suffix: &str) -> String {
    let files = production_source_files();
    let (_, content) = files
        .iter()
        .find(|(path, _)| path.replace('\\', "/").ends_with(suffix))
        .unwrap_or_else(|| panic!("{suffix} not found"));
    production_lines(content)
}

/// Body of `fn name` up to the next function definition.
fn function_body<'a>(content: &'a str, name: &str) -> &'a str {
    let start = content
        .find(&format!("fn {name}"))
        .unwrap_or_else(|| panic!("fn {name} not found"));
    let rest = &content[start..];
    let end = rest[1..]
        .find("\n    pub fn ")
        .or_else(|| rest[1..].find("\npub fn "))
        .or_else(|| rest[1..].find("\nfn "))
        .map(|i| i + 1)
        .unwrap_or(rest.len());
    &rest[..end]
}

#[test]
fn no_hardcoded_private_keys_in_production_code() {
    let hex_64_re = Regex::new(r"0x[a-fA-F0-9]{64}").unwrap();
    let files = production_source_files();

    for (path, content) in &files {
        let prod_content = production_lines(content);

        if let Some(mat) = hex_64_re.find(&prod_content) {
            let line_num = prod_content[..mat.start()].lines().count() + 1;
            let line = prod_content.lines().nth(line_num - 1).unwrap_or("");
            panic!(
                "Potential hardcoded secret found at {}:{}: {}",
                path,
                line_num,
                line.trim()
            );
        }
    }
}

#[test]
fn hmac_no_early_returns_before_mac_computation() {
    let content = production_file("x402-paygate/src/hmac.rs");
    let func_text = function_body(&content, "verify_hmac");

    // A decode failure that returns early leaks timing about the signature format.
    assert!(
        !func_text.contains("return false") && func_text.contains("verify_slice"),
        "verify_hmac may have timing-leaking early returns. \
         Hex decode failures must fall through to the constant-time MAC comparison."
    );
}

#[test]
fn access_tokens_authenticated_before_decoding() {
    let content = production_file("x402-paygate/src/token.rs");
    let func_text = function_body(&content, "verify");

    let mac_at = func_text
        .find("verify_hmac")
        .expect("token verification must check the HMAC");
    let decode_at = func_text
        .find(".decode(")
        .expect("token verification decodes the claims");
    assert!(
        mac_at < decode_at,
        "token claims are decoded before their HMAC is checked"
    );
}

#[test]
fn token_key_is_domain_separated() {
    let content = production_file("x402-paygate/src/token.rs");
    assert!(
        content.contains("derive_key("),
        "access tokens must be signed with a derived key, not the raw configured secret"
    );
}

#[test]
fn http_clients_disable_redirects() {
    let files = production_source_files();
    let builder_re = Regex::new(r"reqwest::Client::builder\(\)").unwrap();
    let redirect_re = Regex::new(r"redirect\s*\(\s*.*Policy::none\(\)").unwrap();

    for (path, content) in &files {
        let prod_content = production_lines(content);

        for mat in builder_re.find_iter(&prod_content) {
            let search_end = (mat.end() + 500).min(prod_content.len());
            let builder_chain = &prod_content[mat.start()..search_end];

            assert!(
                redirect_re.is_match(builder_chain),
                "reqwest::Client::builder() at {} does not set redirect(Policy::none()). \
                 All HTTP clients must disable redirects so signed requests cannot be bounced.",
                path
            );
        }
    }
}

#[test]
fn constant_time_uses_subtle_crate() {
    let files = production_source_files();

    for (path, content) in &files {
        let prod_content = production_lines(content);

        if prod_content.contains("fn constant_time_eq") {
            assert!(
                prod_content.contains("paygate::security::constant_time_eq")
                    || prod_content.contains("subtle::")
                    || prod_content.contains("use subtle"),
                "File {} contains constant_time_eq that doesn't use the subtle crate. \
                 Use paygate::security::constant_time_eq or subtle::ConstantTimeEq directly.",
                path
            );
        }
    }
}

#[test]
fn secret_comparisons_are_constant_time() {
    // Token ids and metrics tokens must never be compared with `==`.
    let gate = production_file("x402-paygate/src/gate.rs");
    assert!(
        gate.contains("constant_time_eq("),
        "gate.rs must compare token ids in constant time"
    );

    let routes = production_file("x402-paygate-server/src/routes.rs");
    assert!(
        routes.contains("constant_time_eq("),
        "routes.rs must compare the metrics token in constant time"
    );
}

#[test]
fn ids_come_from_csprng() {
    let gate = production_file("x402-paygate/src/gate.rs");
    let issue = function_body(&gate, "issue_challenge");
    assert!(
        issue.contains("random_hex_id"),
        "challenge ids must be drawn from the CSPRNG"
    );
    assert!(
        !issue.contains("SystemTime") && !issue.contains("format!(\"challenge-"),
        "challenge ids must not be derived from timestamps"
    );

    let accept = function_body(&gate, "accept_proof");
    assert!(
        accept.contains("random_hex_id"),
        "token ids must be drawn from the CSPRNG"
    );
}

#[test]
fn error_responses_do_not_leak_internals() {
    let files = production_source_files();

    let dangerous_patterns = [
        "store backend error",
        "database error:",
        "stack trace",
        "RUST_BACKTRACE",
    ];

    for (path, content) in &files {
        if !content.contains("HttpResponse::") {
            continue;
        }

        let prod_content = production_lines(content);

        for pattern in &dangerous_patterns {
            for (i, line) in prod_content.lines().enumerate() {
                if line.contains(pattern) && line.contains("json") {
                    panic!(
                        "Potentially sensitive error detail '{}' found in HTTP response at {}:{}. \
                         Internal details should be logged server-side only.",
                        pattern,
                        path,
                        i + 1
                    );
                }
            }
        }
    }

    let error_rs = production_file("x402-paygate-server/src/error.rs");
    assert!(
        error_rs.contains("GateError::Internal(_) => \"An internal error occurred\""),
        "internal gate errors must be replaced with a generic message"
    );
}

#[test]
fn challenge_store_sqlite_preferred_in_production() {
    let state = production_file("x402-paygate-server/src/state.rs");
    assert!(
        state.contains("SqliteChallengeStore"),
        "server state must be able to open a SqliteChallengeStore. \
         An in-memory store forgets spent references on restart."
    );

    let config = production_file("x402-paygate-server/src/config.rs");
    assert!(
        config.contains("None => StoreBackend::Sqlite("),
        "the default store backend must be SQLite"
    );
}

#[test]
fn signing_secret_is_mandatory() {
    let config = production_file("x402-paygate-server/src/config.rs");
    assert!(
        config.contains("pub secret: Vec<u8>") && !config.contains("pub secret: Option<"),
        "PAYGATE_SECRET must be mandatory (Vec<u8>, not Option<Vec<u8>>)"
    );
    assert!(
        config.contains("MissingRequired(\"PAYGATE_SECRET\")"),
        "a missing PAYGATE_SECRET must fail configuration"
    );
}

#[test]
fn accept_all_verifier_requires_insecure_dev() {
    let config = production_file("x402-paygate-server/src/config.rs");
    let start = config
        .find("\"accept-all\" =>")
        .expect("accept-all verifier mode not found");
    let arm = &config[start..(start + 400).min(config.len())];
    assert!(
        arm.contains("if !insecure_dev") && arm.contains("return Err("),
        "PAYGATE_VERIFIER=accept-all must be refused without PAYGATE_INSECURE_DEV"
    );
}
