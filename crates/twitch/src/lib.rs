pub mod helix;
pub mod oauth;

pub use helix::{
    CreateSubscriptionRequest, EventSubSubscription, HelixClient, HelixError, HelixStream,
    HelixUser, SubscriptionTransport,
};
pub use oauth::{OAuthError, TokenResponse, TwitchOAuthClient, ValidateTokenResponse};
