mod api_tests;
mod common;
mod retry_tests;
mod trace_tests;
mod transport_tests;
