//! Main controller implementation.
//!
//! This module contains the `Controller` struct that orchestrates
//! reconciliation and resource watching for the chart controller.

use std::sync::Arc;

use kube::{Api, Client};
use tokio::task::JoinHandle;
use tracing::info;

use crds::Chart;

use crate::apply::ApplyEngine;
use crate::error::ControllerError;
use crate::generate::GeneratorConfig;
use crate::reconciler::Reconciler;
use crate::throttle::{RateLimiter, DEFAULT_CALLS_PER_SECOND};
use crate::watcher;

/// Main controller for Chart management.
pub struct Controller {
    chart_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts the Chart watcher.
    pub async fn new(
        namespace: Option<String>,
        config: GeneratorConfig,
    ) -> Result<Self, ControllerError> {
        info!("Initializing chart controller");

        let client = Client::try_default().await.map_err(ControllerError::Kube)?;
        Ok(Self::with_client(client, namespace, config))
    }

    /// Wires the reconciler and watcher onto an existing client.
    pub fn with_client(client: Client, namespace: Option<String>, config: GeneratorConfig) -> Self {
        let limiter = Arc::new(RateLimiter::new(DEFAULT_CALLS_PER_SECOND));
        let engine = ApplyEngine::new(client.clone(), limiter);
        let reconciler = Arc::new(Reconciler::new(client.clone(), config, engine));

        let chart_api: Api<Chart> = match namespace.as_deref() {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };

        let chart_watcher = tokio::spawn(watcher::watch_charts(chart_api, reconciler));
        Self { chart_watcher }
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Chart controller running");

        (&mut self.chart_watcher)
            .await
            .map_err(|e| ControllerError::Watch(format!("Chart watcher panicked: {}", e)))?
            .map_err(|e| ControllerError::Watch(format!("Chart watcher error: {}", e)))?;

        Ok(())
    }
}
