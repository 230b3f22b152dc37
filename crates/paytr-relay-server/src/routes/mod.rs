pub mod callback;
pub mod health;

use actix_web::web;

/// Register every route the relay serves.
pub fn configure(cfg: &mut web::ServiceConfig) {
    health::configure(cfg);
    callback::configure(cfg);
}
