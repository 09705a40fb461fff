// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Optional rule trace sink
//!
//! Purely diagnostic: after every rule that changed the plan, the sink
//! receives the rule name and the before/after plan text. Compilation output
//! is identical with or without a sink attached.

use serde_json::json;

/// Receives one record per applied rule.
pub trait TraceSink {
    fn record(&mut self, rule: &str, before: &str, after: &str);
}

/// Collects trace records as JSON objects, e.g. for an EXPLAIN surface.
#[derive(Debug, Default)]
pub struct JsonTraceSink {
    pub records: Vec<serde_json::Value>,
}

impl JsonTraceSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TraceSink for JsonTraceSink {
    fn record(&mut self, rule: &str, before: &str, after: &str) {
        self.records.push(json!({
            "rule": rule,
            "before": before,
            "after": after,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_sink_collects_records_in_order() {
        let mut sink = JsonTraceSink::new();
        sink.record("PushSelectCriteria", "a", "b");
        sink.record("CleanCriteria", "b", "c");

        assert_eq!(sink.records.len(), 2);
        assert_eq!(sink.records[0]["rule"], "PushSelectCriteria");
        assert_eq!(sink.records[1]["before"], "b");
    }
}
