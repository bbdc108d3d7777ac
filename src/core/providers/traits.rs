use std::{future::Future, pin::Pin, sync::Arc};

use super::{error::ProviderResult, value::SensorValue};

/// Something that can read one metric from the host.
///
/// Providers are shared between the builder (probe reads) and the
/// publication engine, so they must be thread-safe and keep any state they
/// need (previous counters for rates) behind interior mutability.
#[async_trait::async_trait]
pub trait MetricProvider: Send + Sync + 'static {
    async fn read(&self) -> ProviderResult<SensorValue>;
}

type BoxedRead = Pin<Box<dyn Future<Output = ProviderResult<SensorValue>> + Send>>;

/// Adapts a closure returning a future into a provider.
pub struct FnProvider {
    read: Box<dyn Fn() -> BoxedRead + Send + Sync>,
}

#[async_trait::async_trait]
impl MetricProvider for FnProvider {
    async fn read(&self) -> ProviderResult<SensorValue> {
        (self.read)().await
    }
}

pub fn from_fn<F, Fut>(f: F) -> Arc<dyn MetricProvider>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProviderResult<SensorValue>> + Send + 'static,
{
    Arc::new(FnProvider {
        read: Box::new(move || Box::pin(f())),
    })
}
