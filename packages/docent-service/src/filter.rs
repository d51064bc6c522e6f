use qdrant_client::qdrant::{Condition, Filter};
use serde_json::{Map, Value};

use crate::retrieval::ConversationContext;

/// Exact-match restriction of a vector query to one tenant fingerprint.
///
/// Built per request and never cached. The same filter is applied twice: inside the vector
/// store query, and again on every returned passage through [`TenantFilter::admits`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantFilter {
	pub field: String,
	pub fingerprint: String,
}
impl TenantFilter {
	pub fn new(field: impl Into<String>, fingerprint: impl Into<String>) -> Self {
		Self { field: field.into(), fingerprint: fingerprint.into() }
	}

	pub fn for_context(field: &str, ctx: &ConversationContext) -> Self {
		Self::new(field, ctx.fingerprint())
	}

	pub fn to_qdrant(&self) -> Filter {
		Filter::must([Condition::matches(self.field.clone(), self.fingerprint.clone())])
	}

	pub fn admits(&self, metadata: &Map<String, Value>) -> bool {
		metadata.get(&self.field).and_then(Value::as_str) == Some(self.fingerprint.as_str())
	}
}
