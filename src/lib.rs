//! The root module for the cpp-linter package. This module mainly holds
//! the declarations of the package's other modules.

pub mod advice;
pub mod clang_tools;
pub mod cli;
pub mod comments;
pub mod common_fs;
pub mod config;
pub mod error;
pub mod git;
pub mod logger;
pub mod rest_api;
pub mod run;
pub mod suggestions;

pub use rest_api::github_api;
