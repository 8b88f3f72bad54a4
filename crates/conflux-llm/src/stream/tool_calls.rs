use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::error::ProtocolError;
use crate::types::ToolCall;

/// One streamed piece of a tool call
#[derive(Debug, Clone, Default)]
pub struct ToolCallFragment {
    /// Position of the call within the turn, when the vendor sends one
    pub index: Option<u32>,
    /// Call id, usually present only on the first fragment
    pub id: Option<String>,
    /// Function name, usually present only on the first fragment
    pub name: Option<String>,
    /// Arguments JSON fragment
    pub arguments: String,
}

#[derive(Debug)]
struct PendingCall {
    name: String,
    arguments: String,
}

/// Reassembles tool calls whose arguments arrive as JSON fragments
///
/// Buffers are keyed by call id. Fragments without an id go to the buffer
/// registered for their index, or failing that to the current buffer. A call
/// completes as soon as its accumulated arguments parse as a JSON object.
/// Empty fragments that trail a completed call are ignored.
#[derive(Debug)]
pub struct ToolCallAssembler {
    provider: &'static str,
    pending: IndexMap<String, PendingCall>,
    current: Option<String>,
    by_index: HashMap<u32, String>,
    done: HashSet<String>,
    completed: usize,
}

impl ToolCallAssembler {
    /// Create an assembler reporting errors on behalf of `provider`
    pub fn new(provider: &'static str) -> Self {
        Self {
            provider,
            pending: IndexMap::new(),
            current: None,
            by_index: HashMap::new(),
            done: HashSet::new(),
            completed: 0,
        }
    }

    /// Add a fragment, returning the call if it just became complete
    pub fn push(&mut self, fragment: ToolCallFragment) -> Result<Option<ToolCall>, ProtocolError> {
        if fragment.arguments.is_empty() && self.is_trailing(&fragment) {
            return Ok(None);
        }

        let id = self.resolve(&fragment)?;

        let Some(buffer) = self.pending.get_mut(&id) else {
            return Err(self.malformed(format!("no open tool call buffer for id '{id}'")));
        };

        if buffer.name.is_empty()
            && let Some(name) = fragment.name
        {
            buffer.name = name;
        }
        buffer.arguments.push_str(&fragment.arguments);

        if is_complete_object(&buffer.arguments) {
            return Ok(Some(self.take(&id)));
        }

        Ok(None)
    }

    /// Close the current call at an explicit block boundary
    ///
    /// A call that never received arguments is completed with `{}`.
    /// Arguments that still do not parse are reported as incomplete.
    pub fn close_current(&mut self) -> Result<Option<ToolCall>, ProtocolError> {
        let Some(id) = self.current.clone() else {
            return Ok(None);
        };

        let Some(buffer) = self.pending.get_mut(&id) else {
            self.current = None;
            return Ok(None);
        };

        if buffer.arguments.trim().is_empty() {
            buffer.arguments = "{}".to_owned();
            return Ok(Some(self.take(&id)));
        }

        Err(incomplete(&id, buffer))
    }

    /// Check that no call is left half-assembled at the end of a turn
    pub fn finish(&self) -> Result<(), ProtocolError> {
        match self.pending.first() {
            Some((id, buffer)) => Err(incomplete(id, buffer)),
            None => Ok(()),
        }
    }

    /// Whether any call is still being assembled
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Number of calls completed so far in this turn
    pub const fn completed(&self) -> usize {
        self.completed
    }

    /// Whether a fragment belongs to no open call, only to finished ones
    fn is_trailing(&self, fragment: &ToolCallFragment) -> bool {
        match fragment.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => self.done.contains(id) && !self.pending.contains_key(id),
            None => {
                self.current.is_none()
                    && !fragment
                        .index
                        .and_then(|index| self.by_index.get(&index))
                        .is_some_and(|id| self.pending.contains_key(id))
            }
        }
    }

    fn resolve(&mut self, fragment: &ToolCallFragment) -> Result<String, ProtocolError> {
        if let Some(id) = fragment.id.as_deref().filter(|id| !id.is_empty()) {
            if !self.pending.contains_key(id) {
                self.pending.insert(
                    id.to_owned(),
                    PendingCall {
                        name: String::new(),
                        arguments: String::new(),
                    },
                );
            }
            if let Some(index) = fragment.index {
                self.by_index.insert(index, id.to_owned());
            }
            self.current = Some(id.to_owned());
            return Ok(id.to_owned());
        }

        if let Some(id) = fragment.index.and_then(|index| self.by_index.get(&index))
            && self.pending.contains_key(id)
        {
            return Ok(id.clone());
        }

        self.current.clone().ok_or_else(|| {
            self.malformed(format!(
                "tool call fragment without id and no open call (index {:?})",
                fragment.index
            ))
        })
    }

    fn take(&mut self, id: &str) -> ToolCall {
        let buffer = self.pending.shift_remove(id).unwrap_or(PendingCall {
            name: String::new(),
            arguments: String::new(),
        });

        if self.current.as_deref() == Some(id) {
            self.current = None;
        }
        self.by_index.retain(|_, v| v != id);
        self.done.insert(id.to_owned());
        self.completed += 1;

        ToolCall::new(id, buffer.name, buffer.arguments)
    }

    fn malformed(&self, detail: String) -> ProtocolError {
        ProtocolError::MalformedEvent {
            provider: self.provider,
            detail,
        }
    }
}

fn is_complete_object(arguments: &str) -> bool {
    serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(arguments).is_ok()
}

fn incomplete(id: &str, buffer: &PendingCall) -> ProtocolError {
    ProtocolError::IncompleteToolCall {
        id: id.to_owned(),
        name: buffer.name.clone(),
        arguments: buffer.arguments.clone(),
    }
}
