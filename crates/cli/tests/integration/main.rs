//! End-to-end tests running `stv` against a scripted `helm` binary.

#![cfg(unix)]

mod common;
