//! Reassembly of tool calls that arrive split across stream frames

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::sse::ToolCallFragment;
use crate::types::ToolCall;

#[derive(Debug, Default, Clone)]
struct Slot {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Merges `ToolCallFragment`s into complete calls, preserving first-seen order.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    slots: Vec<Slot>,
    by_id: HashMap<String, usize>,
    by_index: HashMap<usize, usize>,
    last: Option<usize>,
    sealed: Option<Vec<SealedToolCall>>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment.
    pub fn push(&mut self, fragment: ToolCallFragment) -> Result<()> {
        if self.sealed.is_some() {
            return Err(Error::AlreadySealed);
        }

        let slot = self.route(&fragment);
        // An index belongs to the call most recently seen at it, so id-less
        // continuations follow a new id that reused the index.
        if let Some(index) = fragment.index {
            self.by_index.insert(index, slot);
        }
        self.last = Some(slot);

        let entry = &mut self.slots[slot];
        if let Some(id) = fragment.id {
            if entry.id.is_none() {
                self.by_id.insert(id.clone(), slot);
                entry.id = Some(id);
            }
        }
        if entry.name.is_none() {
            entry.name = fragment.name;
        }
        if let Some(arguments) = fragment.arguments {
            entry.arguments.push_str(&arguments);
        }
        Ok(())
    }

    fn route(&mut self, fragment: &ToolCallFragment) -> usize {
        if let Some(id) = &fragment.id {
            if let Some(&slot) = self.by_id.get(id) {
                return slot;
            }
            // A new id at an index whose slot has no id yet fills that slot;
            // a new id at an index already owned by another id starts a call.
            if let Some(&slot) = fragment.index.and_then(|i| self.by_index.get(&i)) {
                if self.slots[slot].id.is_none() {
                    return slot;
                }
                return self.open_slot();
            }
            return self.open_slot();
        }

        if let Some(index) = fragment.index {
            if let Some(&slot) = self.by_index.get(&index) {
                return slot;
            }
            return self.open_slot();
        }

        match self.last {
            Some(slot) => slot,
            None => self.open_slot(),
        }
    }

    fn open_slot(&mut self) -> usize {
        self.slots.push(Slot::default());
        self.slots.len() - 1
    }

    /// Number of calls seen so far
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether `seal` has been called
    pub fn is_sealed(&self) -> bool {
        self.sealed.is_some()
    }

    /// Mark the end of the stream. Idempotent.
    pub fn seal(&mut self) {
        if self.sealed.is_some() {
            return;
        }
        let calls = self
            .slots
            .iter()
            .map(|slot| SealedToolCall {
                id: slot
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                name: slot.name.clone().unwrap_or_default(),
                arguments: slot.arguments.clone(),
            })
            .collect();
        self.sealed = Some(calls);
    }

    /// The completed calls, available once sealed
    pub fn sealed_calls(&self) -> Result<&[SealedToolCall]> {
        self.sealed.as_deref().ok_or(Error::NotSealed)
    }

    /// Consume the accumulator, returning the completed calls
    pub fn into_sealed(self) -> Result<Vec<SealedToolCall>> {
        self.sealed.ok_or(Error::NotSealed)
    }
}

/// A complete tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedToolCall {
    pub id: String,
    pub name: String,
    /// Raw argument text, exactly as concatenated from the stream
    pub arguments: String,
}

impl SealedToolCall {
    /// Parse the argument text into a JSON object.
    ///
    /// Blank text is `{}`; a JSON string that itself holds an object is
    /// unwrapped once.
    pub fn parse_arguments(&self) -> Result<Map<String, Value>> {
        parse_arguments(&self.arguments)
    }

    /// Convert to the wire representation recorded in history
    pub fn to_tool_call(&self) -> ToolCall {
        ToolCall::new(&self.id, &self.name, &self.arguments)
    }
}

/// Parse raw tool-call argument text into a JSON object
pub fn parse_arguments(raw: &str) -> Result<Map<String, Value>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Map::new());
    }

    let value: Value = serde_json::from_str(raw)
        .map_err(|e| Error::ToolArguments(format!("{} (arguments: {})", e, raw)))?;

    match value {
        Value::Object(map) => Ok(map),
        Value::String(inner) => match serde_json::from_str::<Value>(&inner) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(Error::ToolArguments(format!(
                "expected a JSON object, got string {:?}",
                inner
            ))),
        },
        other => Err(Error::ToolArguments(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}
