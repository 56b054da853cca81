//src/main.rs

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;

mod common;
mod config;
mod db;
mod handlers;
mod models;
mod services;

use crate::config::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_target(false).compact().init();

    // .expect() é bom aqui: se a configuração falhar, a aplicação não deve iniciar.
    let app_state = AppState::new()
        .await
        .expect("Falha ao inicializar o estado da aplicação.");

    sqlx::migrate!()
        .run(&app_state.db_pool)
        .await
        .expect("Falha ao rodar as migrações do banco de dados.");

    tracing::info!("✅ Migrações do banco de dados executadas com sucesso!");

    // Rotas de CRUD de funis, etapas e oportunidades
    let funnel_routes = Router::new()
        .route("/"
               ,post(handlers::funnels::create_funnel)
               .get(handlers::funnels::list_funnels)
        )
        .route("/{funnel_id}", get(handlers::funnels::get_funnel))
        .route("/{funnel_id}/stages"
               ,post(handlers::funnels::create_stage)
        )
        .route("/{funnel_id}/opportunities"
               ,post(handlers::funnels::create_opportunity)
        );

    // Rotas do board: visão, drag e o ciclo do movimento pendente
    let board_routes = Router::new()
        .route("/{funnel_id}/board", get(handlers::board::get_board))
        .route("/{funnel_id}/drag", post(handlers::board::drag))
        .route("/{funnel_id}/pending/fields", post(handlers::board::submit_fields))
        .route("/{funnel_id}/pending/reason", post(handlers::board::submit_reason))
        .route("/{funnel_id}/pending", delete(handlers::board::cancel_pending))
        .route(
            "/{funnel_id}/opportunities/{opportunity_id}/move",
            post(handlers::board::move_opportunity),
        );

    // Combina tudo no router principal
    let app = Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route(
            "/api/opportunities/{opportunity_id}/history",
            get(handlers::funnels::list_history),
        )
        .nest("/api/funnels", funnel_routes.merge(board_routes))
        .with_state(app_state);

    // Inicia o servidor
    let addr = "0.0.0.0:3000";
    let listener = TcpListener::bind(addr)
        .await
        .expect("Falha ao iniciar o listener TCP");
    tracing::info!("🚀 Servidor escutando em {}", listener.local_addr().unwrap());
    axum::serve(listener, app)
        .await
        .expect("Erro no servidor Axum");
}
