pub mod client;
pub mod oauth1;

pub use client::{AccessToken, TwitterApi, TwitterClient, TwitterError, TwitterProfile};
