/// Easy VM Cloud - Server
///
/// 集群核心：键值存储之上的容量记账、调度、生命周期与集群编排，
/// 以及对外的 REST API

pub mod api;
pub mod app_state;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod metrics;
pub mod migration;
pub mod services;
