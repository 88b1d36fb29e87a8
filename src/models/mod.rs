pub mod activity;
pub mod project;
pub mod site_config;
