use std::str::FromStr;

use crate::error::ProtocolError;
use crate::types::FinishReason;

/// Mapping from a vendor's termination vocabulary onto canonical reasons
///
/// `None` means the vendor reported an unfinished or unspecified state.
pub trait VendorFinishReason: FromStr {
    /// Canonical reason for this vendor value
    fn canonical(&self) -> Option<FinishReason>;
}

/// Parse a vendor finish value, failing loudly on anything unknown
pub fn parse_finish_reason<R: VendorFinishReason>(provider: &'static str, value: &str) -> Result<R, ProtocolError> {
    value.parse().map_err(|_| ProtocolError::UnknownFinishReason {
        provider,
        value: value.to_owned(),
    })
}

/// Resolve a vendor finish value to its canonical reason
pub fn canonical_finish_reason<R: VendorFinishReason>(
    provider: &'static str,
    value: &str,
) -> Result<Option<FinishReason>, ProtocolError> {
    parse_finish_reason::<R>(provider, value).map(|reason| reason.canonical())
}

/// Report a plain stop as a tool-call stop when the turn produced tool calls
pub const fn reconcile_finish_reason(reason: Option<FinishReason>, has_tool_calls: bool) -> Option<FinishReason> {
    match reason {
        Some(FinishReason::Stop) if has_tool_calls => Some(FinishReason::ToolCalls),
        other => other,
    }
}
