// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Expected-record patterns.
//!
//! A test encodes its assertion as a regular expression over the full
//! decoded line — event name, argument substrings, outcome — which keeps
//! assertions loose and order-tolerant ("msgget.*return,success,17") without
//! parsing every token. Matching is case-sensitive and single-line. There is
//! no rescanning on mismatch: the trail's cursor discipline guarantees the
//! first new record is the one the test's own syscall caused, so a mismatch
//! is an immediate failure.

use regex::Regex;

use crate::record::DecodedRecord;

/// A compiled expectation over one decoded record line.
#[derive(Debug, Clone)]
pub struct ExpectedPattern {
    re: Regex,
}

impl ExpectedPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            re: Regex::new(pattern)?,
        })
    }

    pub fn as_str(&self) -> &str {
        self.re.as_str()
    }

    pub fn matches(&self, record: &DecodedRecord) -> bool {
        self.re.is_match(&record.line)
    }
}
