pub mod abi;
pub mod aggregator;
pub mod api;
pub mod config;
pub mod db;
pub mod indexer;
pub mod logging;
pub mod mapper;
pub mod models;
pub mod parser;
pub mod portfolio;
pub mod rpc;
pub mod store;
pub mod subgraph;
pub mod wallet;
