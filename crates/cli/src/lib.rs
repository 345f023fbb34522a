// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod config;
pub mod error;
pub mod event;
pub mod install;
pub mod log;
pub mod process;
pub mod pty;
pub mod run;
pub mod service;
pub mod status;
pub mod stream;
pub mod terminal;
pub mod test_support;
pub mod transport;

static CRYPTO_INIT: std::sync::Once = std::sync::Once::new();

/// Install the rustls crypto provider (needed by reqwest before any client is built).
pub fn install_crypto_provider() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
