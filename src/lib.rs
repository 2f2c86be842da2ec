// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Astra
//!
//! Inner-loop development of [Devfile](https://devfile.io) components on
//! Kubernetes clusters and Podman.
//!
//! ## Overview
//!
//! `astra dev` turns a devfile into running containers and keeps them in sync
//! with the local sources:
//!
//! - Deploys the container components as a Kubernetes Deployment or a Podman pod
//! - Pushes changed files into the containers and runs the build and run commands
//! - Forwards the declared endpoints on local ports
//! - Watches the sources and reconciles again on every change
//! - Serves a local HTTP API for editors
//!
//! ## Architecture
//!
//! Every pass is a **reconcile**: the desired state comes from the devfile, the
//! observed state is rediscovered from labels on the platform, and the
//! [`dev::DevClient`] of the platform brings the two in line.
//!
//! ## Modules
//!
//! - [`devfile`]: Devfile model, parsing and validation
//! - [`labels`]: Labels and selectors of the managed resources
//! - [`config`]: Environment configuration and user preferences
//! - [`state`]: Devstate files of running sessions
//! - [`platform`]: Kubernetes and Podman clients
//! - [`image`]: Image build and push
//! - [`sync`]: File synchronisation into containers
//! - [`component`]: Command execution, description and deletion of components
//! - [`dev`]: Reconcilers of the dev mode
//! - [`watch`]: File watching and the push loop
//! - [`apiserver`]: Local HTTP API
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! schemaVersion: 2.2.0
//! metadata:
//!   name: api
//! components:
//!   - name: runtime
//!     container:
//!       image: registry.access.redhat.com/ubi8/nodejs-18
//!       endpoints:
//!         - name: http
//!           targetPort: 3000
//! commands:
//!   - id: run
//!     exec:
//!       component: runtime
//!       commandLine: npm start
//!       group:
//!         kind: run
//!         isDefault: true
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod apiserver;
pub mod cli;
pub mod component;
pub mod config;
pub mod dev;
pub mod devfile;
pub mod error;
pub mod image;
pub mod labels;
pub mod platform;
pub mod state;
pub mod sync;
pub mod watch;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{EnvConfig, Preferences};
pub use dev::{DevClient, DevSession, PushParameters, StartOptions};
pub use devfile::{parse_and_validate, DevfileObj};
pub use error::{AstraError, Result};
pub use state::{DevstateStore, ForwardedPort, Platform, StateStore};
