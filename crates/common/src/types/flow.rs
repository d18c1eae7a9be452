// Tether - Remote debug session orchestrator
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use serde::{Deserialize, Serialize};

/// Default cap on the number of programs in one cross-program call chain.
pub const DEFAULT_MAX_CPI_DEPTH: usize = 4;

/// A configured cross-program invocation chain.
///
/// When the test under debug is named `test_name`, one debug endpoint per
/// entry of `program_sequence` is expected, in that order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CpiFlow {
    /// Exact name of the test function this flow applies to.
    #[serde(alias = "test_name")]
    pub test_name: String,
    /// Programs invoked along the chain, outermost first.
    #[serde(alias = "program_sequence")]
    pub program_sequence: Vec<String>,
}

impl CpiFlow {
    /// Creates a flow.
    pub fn new(test_name: impl Into<String>, programs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            test_name: test_name.into(),
            program_sequence: programs.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether this flow applies to `test_name` (exact match).
    pub fn matches(&self, test_name: &str) -> bool {
        self.test_name == test_name
    }

    /// Number of nested program endpoints this flow opens.
    pub fn depth(&self) -> usize {
        self.program_sequence.len()
    }
}

/// Finds the flow configured for `test_name`, if any.
pub fn find_flow<'a>(flows: &'a [CpiFlow], test_name: &str) -> Option<&'a CpiFlow> {
    flows.iter().find(|flow| flow.matches(test_name))
}
