//! Process-wide lazily constructed resources.
//!
//! A [`ResourceCell`] holds at most one instance. Concurrent first callers wait on the single
//! in-flight construction and all observe the same `Arc`. A failed construction returns its error
//! only to the caller that ran it and leaves the cell empty. Each waiting caller then runs its own
//! construction in turn until one succeeds. There is no invalidation.

use std::{future::Future, sync::Arc, time::Instant};

use tokio::sync::OnceCell;

use crate::{BoxFuture, Result};

/// Builds one expensive resource, such as an index handle or a response synthesizer.
pub trait ResourceFactory<T>
where
	Self: Send + Sync,
{
	fn build<'a>(&'a self) -> BoxFuture<'a, Result<T>>;
}

pub struct ResourceCell<T> {
	name: &'static str,
	cell: OnceCell<Arc<T>>,
}
impl<T> ResourceCell<T> {
	pub fn new(name: &'static str) -> Self {
		Self { name, cell: OnceCell::new() }
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn get(&self) -> Option<Arc<T>> {
		self.cell.get().cloned()
	}

	pub fn is_initialized(&self) -> bool {
		self.cell.initialized()
	}

	pub async fn get_or_init<F, Fut>(&self, init: F) -> Result<Arc<T>>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let value = self
			.cell
			.get_or_try_init(move || async move {
				let started = Instant::now();

				match init().await {
					Ok(value) => {
						tracing::info!(
							resource = self.name,
							elapsed_ms = started.elapsed().as_millis() as u64,
							"Constructed cached resource."
						);

						Ok(Arc::new(value))
					},
					Err(err) => {
						tracing::warn!(
							resource = self.name,
							error = %err,
							"Cached resource construction failed."
						);

						Err(err)
					},
				}
			})
			.await?;

		Ok(value.clone())
	}

	pub async fn get_or_build(&self, factory: &dyn ResourceFactory<T>) -> Result<Arc<T>> {
		self.get_or_init(|| factory.build()).await
	}
}
