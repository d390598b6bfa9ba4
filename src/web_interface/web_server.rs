use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use log::info;
use tokio::net::TcpListener;
use warp::{Filter, Reply};

use super::routes::*;
use crate::error_handling::types::WebError;
use crate::session_management::session_manager::SessionManager;

/// Local HTTP server for the dashboard, session API and live stream.
pub struct WebServer {
    manager: Arc<SessionManager>,
}

impl WebServer {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    pub fn routes(&self) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
        let manager = &self.manager;
        dashboard_route()
            .or(list_sessions_route(Arc::clone(manager)))
            .or(entries_route(Arc::clone(manager)))
            .or(stream_route(Arc::clone(manager)))
            .or(delete_session_route(Arc::clone(manager)))
            .or(cleanup_route(Arc::clone(manager)))
            .or(get_settings_route(Arc::clone(manager)))
            .or(put_settings_route(Arc::clone(manager)))
            .recover(handle_rejection)
    }

    /// Serves on `127.0.0.1:port` until the task is dropped.
    pub async fn start(&self, port: u16) -> Result<(), WebError> {
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| WebError::Bind { addr, source })?;

        info!("Dashboard listening on http://{}", addr);
        warp::serve(self.routes()).incoming(listener).run().await;
        Ok(())
    }
}
