pub mod config;
pub mod sys_errorpages;
pub mod sys_server;
pub mod sys_store;
