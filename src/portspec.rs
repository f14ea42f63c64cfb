//! Textual port specifications such as `"22,80,443,8000-8010"`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::PortSpecError;

/// Sorted, duplicate-free set of TCP ports in 1..=65535
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec(Vec<u16>);

impl PortSpec {
    /// Parse comma-separated single ports and inclusive `start-end` ranges.
    ///
    /// Empty tokens between commas are skipped. Any malformed token fails the
    /// whole parse.
    pub fn parse(input: &str) -> Result<Self, PortSpecError> {
        let mut ports = BTreeSet::new();

        for token in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let malformed = || PortSpecError::Format {
                token: token.to_string(),
            };

            match token.split_once('-') {
                Some((start, end)) => {
                    let start = parse_port_number(start).ok_or_else(malformed)?;
                    let end = parse_port_number(end).ok_or_else(malformed)?;
                    if start > end {
                        return Err(malformed());
                    }
                    ports.extend(start..=end);
                }
                None => {
                    ports.insert(parse_port_number(token).ok_or_else(malformed)?);
                }
            }
        }

        if ports.is_empty() {
            return Err(PortSpecError::Empty);
        }

        Ok(Self(ports.into_iter().collect()))
    }

    pub fn ports(&self) -> &[u16] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }
}

/// Parse one port number, rejecting 0 and anything above 65535
fn parse_port_number(text: &str) -> Option<u16> {
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match text.parse::<u32>() {
        Ok(n) if (1..=65535).contains(&n) => Some(n as u16),
        _ => None,
    }
}

impl FromStr for PortSpec {
    type Err = PortSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ports: Vec<String> = self.0.iter().map(u16::to_string).collect();
        f.write_str(&ports.join(","))
    }
}
