// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for wgpin.
//!
//! This crate provides:
//! - A client builder carrying the wgpin User-Agent header
//! - Retry logic with exponential backoff for transient failures

mod client;
mod retry;

pub use client::{builder, user_agent};
pub use retry::{retry, RetryConfig, RetryableError};
