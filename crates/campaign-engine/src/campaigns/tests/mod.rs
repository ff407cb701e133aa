mod common;
mod datasets;
mod service;
