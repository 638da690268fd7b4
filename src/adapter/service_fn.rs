//! Closure-backed [`ToolService`].
//!
//! Lets a service be assembled from a core-execution closure plus optional
//! fallback hooks instead of a dedicated type.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{json, Value};

use super::{not_implemented, FallbackStrategy, ToolContext, ToolService, DEFAULT_TTL};
use crate::cache::CacheLayer;

/// Type-erased async operation over owned parameters and context.
pub type ServiceFn =
    Arc<dyn Fn(Value, ToolContext) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

type TransformFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Wrap an async closure as a [`ServiceFn`].
pub fn service_fn<F, Fut>(f: F) -> ServiceFn
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |params: Value, ctx: ToolContext| -> BoxFuture<'static, anyhow::Result<Value>> {
        Box::pin(f(params, ctx))
    })
}

/// Optional degraded-mode implementations.
#[derive(Clone, Default)]
pub struct FallbackHooks {
    pub simplified: Option<ServiceFn>,
    pub partial: Option<ServiceFn>,
    pub default: Option<ServiceFn>,
}

pub struct FnService {
    name: String,
    description: String,
    input_schema: Value,
    layer: CacheLayer,
    ttl: Duration,
    core: ServiceFn,
    transform: Option<TransformFn>,
    health_params: Value,
    hooks: FallbackHooks,
}

impl FnService {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        core: F,
    ) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            layer: CacheLayer::General,
            ttl: DEFAULT_TTL,
            core: service_fn(core),
            transform: None,
            health_params: json!({}),
            hooks: FallbackHooks::default(),
        }
    }

    pub fn with_layer(mut self, layer: CacheLayer) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn with_health_params(mut self, params: Value) -> Self {
        self.health_params = params;
        self
    }

    pub fn with_hooks(mut self, hooks: FallbackHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_partial(mut self, hook: ServiceFn) -> Self {
        self.hooks.partial = Some(hook);
        self
    }

    pub fn with_default(mut self, hook: ServiceFn) -> Self {
        self.hooks.default = Some(hook);
        self
    }

    async fn run_hook(
        &self,
        hook: Option<&ServiceFn>,
        strategy: FallbackStrategy,
        params: &Value,
        ctx: &ToolContext,
    ) -> anyhow::Result<Value> {
        match hook {
            Some(hook) => hook(params.clone(), ctx.clone()).await,
            None => Err(not_implemented(&self.name, strategy)),
        }
    }
}

#[async_trait]
impl ToolService for FnService {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.input_schema.clone()
    }

    fn cache_layer(&self) -> CacheLayer {
        self.layer
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn execute_core(&self, params: &Value, ctx: &ToolContext) -> anyhow::Result<Value> {
        (self.core)(params.clone(), ctx.clone()).await
    }

    fn transform_output(&self, output: Value, _ctx: &ToolContext) -> Value {
        match &self.transform {
            Some(transform) => transform(output),
            None => output,
        }
    }

    fn health_check_params(&self) -> Value {
        self.health_params.clone()
    }

    async fn simplified_result(&self, params: &Value, ctx: &ToolContext) -> anyhow::Result<Value> {
        self.run_hook(self.hooks.simplified.as_ref(), FallbackStrategy::Simplified, params, ctx)
            .await
    }

    async fn partial_result(&self, params: &Value, ctx: &ToolContext) -> anyhow::Result<Value> {
        self.run_hook(self.hooks.partial.as_ref(), FallbackStrategy::Partial, params, ctx)
            .await
    }

    async fn default_result(&self, params: &Value, ctx: &ToolContext) -> anyhow::Result<Value> {
        self.run_hook(self.hooks.default.as_ref(), FallbackStrategy::Default, params, ctx)
            .await
    }
}
