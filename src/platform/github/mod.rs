mod auth;
mod client;

pub use client::GitHubPlatform;
