pub mod api;
pub mod config;
pub mod dispatch;
pub mod entity;
pub mod fake_feed;
pub mod feed;
pub mod fetcher;
pub mod http_client;
pub mod persist;
pub mod selection;
pub mod state;
pub mod view;
