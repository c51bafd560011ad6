mod cache_tests;
mod common;
mod fingerprint_tests;
