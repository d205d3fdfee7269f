// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use tracing::warn;

/// Parse `KEY=VALUE` entries into key-value pairs, keeping their order.
/// Values may be wrapped in single or double quotes. Blank entries are
/// ignored; entries without `=` or with an empty key are logged and skipped.
pub fn parse_environment(entries: &[String]) -> Vec<(String, String)> {
    let mut vars = Vec::with_capacity(entries.len());
    for entry in entries {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed.split_once('=') {
            Some((key, raw_val)) if !key.trim().is_empty() => {
                let val = raw_val
                    .trim()
                    .trim_matches('"')
                    .trim_matches('\'')
                    .to_string();
                vars.push((key.trim().to_string(), val));
            }
            _ => warn!(entry = %trimmed, "skipping malformed environment entry"),
        }
    }
    vars
}
