// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::{controller, reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client, Resource};
use kube_lease_manager::LeaseManagerBuilder;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tunnelgate::{
    cloudflare::{ClientCache, CloudflareClient},
    config::ControllerConfig,
    constants::{EVENT_DEBOUNCE_MILLIS, METRICS_SERVER_PATH, TOKIO_WORKER_THREADS},
    context::{Context, Stores},
    crd::TunnelConfig,
    deployment::KubeDeploymentManager,
    gateway_api::{GRPCRoute, Gateway, GatewayClass, HTTPRoute, ReferenceGrant},
    metrics,
    reconcilers::{gateway, retry::RequeueBackoff, retry::RetryPolicy, routes},
    sync::SyncEngine,
};

fn main() -> Result<()> {
    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("tunnelgate-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    // Respects RUST_LOG (default INFO) and RUST_LOG_FORMAT=json|text
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    let config = Arc::new(ControllerConfig::parse());
    info!(
        controller_name = %config.controller_name,
        leader_election = config.leader_election,
        workers = config.workers,
        "Starting Cloudflare tunnel Gateway controller"
    );

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let metrics_address = format!("{}:{}", config.metrics_bind_address, config.metrics_port);

    tokio::select! {
        result = run_metrics_server(&metrics_address) => {
            error!("CRITICAL: metrics server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("metrics server exited unexpectedly without error")
        }
        result = run_with_leader_election(client, config) => {
            error!("CRITICAL: controllers exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("controllers exited unexpectedly without error")
        }
        () = shutdown_signal() => {
            info!("Shutdown signal received, stopping");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Serve Prometheus metrics and the health probes.
async fn run_metrics_server(address: &str) -> Result<()> {
    let app = Router::new()
        .route(METRICS_SERVER_PATH, get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }));

    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("Serving metrics on http://{}{}", address, METRICS_SERVER_PATH);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Run the controllers only while this replica holds the lease.
///
/// Each leadership term gets its own controllers and [`Context`]; losing the
/// lease drops them, which cancels in-flight reconciles.
async fn run_with_leader_election(client: Client, config: Arc<ControllerConfig>) -> Result<()> {
    if !config.leader_election {
        warn!("Leader election disabled, running controllers unconditionally");
        return run_controllers(client, config).await;
    }

    let identity = config.holder_identity();
    let manager = LeaseManagerBuilder::new(client.clone(), &config.lease_name)
        .with_namespace(&config.lease_namespace)
        .with_identity(&identity)
        .with_duration(config.lease_duration_secs)
        .with_grace(config.lease_grace_secs)
        .build()
        .await?;
    let (mut leader, _lease_task) = manager.watch().await;

    info!(
        identity = %identity,
        lease = %config.lease_name,
        namespace = %config.lease_namespace,
        "Waiting for leadership"
    );

    loop {
        wait_for_leadership(&mut leader, true).await?;
        info!("Leadership acquired by {}", identity);
        metrics::record_leader_elected(&identity);

        tokio::select! {
            result = run_controllers(client.clone(), config.clone()) => {
                metrics::record_leader_lost(&identity);
                return result;
            }
            result = wait_for_leadership(&mut leader, false) => {
                metrics::record_leader_lost(&identity);
                warn!("Leadership lost by {}, stopping controllers", identity);
                result?;
            }
        }
    }
}

/// Wait until the lease state equals `wanted`.
async fn wait_for_leadership(leader: &mut watch::Receiver<bool>, wanted: bool) -> Result<()> {
    while *leader.borrow_and_update() != wanted {
        leader.changed().await?;
    }
    Ok(())
}

/// Reflector over every object of `K`, plus the stream that keeps it current.
fn reflect<K>(client: &Client) -> (reflector::Store<K>, BoxStream<'static, ()>)
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let events = watcher(Api::<K>::all(client.clone()), watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .touched_objects()
        .filter_map(|event| async move {
            match event {
                Ok(_) => Some(()),
                Err(e) => {
                    warn!("Watch of {} failed: {}", K::kind(&()), e);
                    None
                }
            }
        })
        .boxed();
    (reader, events)
}

/// Forward every signal of `events` to `targets`.
async fn fan_out(events: BoxStream<'static, ()>, targets: Vec<UnboundedSender<()>>) {
    events
        .for_each(|()| {
            for target in &targets {
                // A closed receiver means its controller is shutting down
                let _ = target.unbounded_send(());
            }
            futures::future::ready(())
        })
        .await;
}

/// Build a fresh [`Context`] and run both controllers until one of them exits.
async fn run_controllers(client: Client, config: Arc<ControllerConfig>) -> Result<()> {
    let (gateway_classes, class_events) = reflect::<GatewayClass>(&client);
    let (tunnel_configs, tunnel_events) = reflect::<TunnelConfig>(&client);
    let (gateways, gateway_events) = reflect::<Gateway>(&client);
    let (http_routes, http_route_events) = reflect::<HTTPRoute>(&client);
    let (grpc_routes, grpc_route_events) = reflect::<GRPCRoute>(&client);
    let (reference_grants, grant_events) = reflect::<ReferenceGrant>(&client);
    let (services, service_events) = reflect::<Service>(&client);

    let ctx = Arc::new(Context {
        client: client.clone(),
        config: config.clone(),
        stores: Stores {
            gateway_classes,
            tunnel_configs,
            gateways,
            http_routes,
            grpc_routes,
            reference_grants,
            services,
        },
        sync: Arc::new(SyncEngine::new(
            RetryPolicy::with_max_attempts(config.sync_max_attempts),
            config.api_timeout(),
        )),
        deployments: Arc::new(KubeDeploymentManager::new(client.clone(), config.api_timeout())),
        http: CloudflareClient::http_client(config.api_timeout())?,
        tunnel_clients: Arc::new(ClientCache::new()),
        gateway_backoff: Arc::new(RequeueBackoff::default()),
        route_backoff: Arc::new(RequeueBackoff::default()),
    });

    // Gateways follow their class and TunnelConfig; tunnels follow everything
    let (gateway_tx, gateway_rx) = unbounded();
    let (tunnel_tx, tunnel_rx) = unbounded();
    let reflectors = futures::future::join(
        fan_out(
            stream::select_all([class_events, tunnel_events]).boxed(),
            vec![gateway_tx, tunnel_tx.clone()],
        ),
        fan_out(
            stream::select_all([
                gateway_events,
                http_route_events,
                grpc_route_events,
                grant_events,
                service_events,
            ])
            .boxed(),
            vec![tunnel_tx],
        ),
    );

    let controller_config = controller::Config::default()
        .concurrency(config.workers)
        .debounce(Duration::from_millis(EVENT_DEBOUNCE_MILLIS));

    info!("Starting Gateway controller");
    let gateway_controller = Controller::new(
        Api::<Gateway>::all(client.clone()),
        watcher::Config::default(),
    )
    .with_config(controller_config.clone())
    .reconcile_all_on(gateway_rx)
    .run(gateway::reconcile, gateway::error_policy, ctx.clone())
    .for_each(|result| async move {
        if let Err(e) = result {
            debug!("Gateway reconcile failed: {}", e);
        }
    });

    info!("Starting tunnel controller");
    let tunnel_controller = Controller::new(
        Api::<TunnelConfig>::all(client.clone()),
        watcher::Config::default(),
    )
    .with_config(controller_config)
    .reconcile_all_on(tunnel_rx)
    .run(routes::reconcile, routes::error_policy, ctx)
    .for_each(|result| async move {
        if let Err(e) = result {
            debug!("Tunnel reconcile failed: {}", e);
        }
    });

    let stopped = tokio::select! {
        ((), ()) = reflectors => "reflectors",
        () = gateway_controller => "Gateway controller",
        () = tunnel_controller => "tunnel controller",
    };
    error!("CRITICAL: {} stopped", stopped);
    anyhow::bail!("{} stopped", stopped)
}
