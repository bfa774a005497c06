pub mod bind;
pub mod chat;
pub mod events;
pub mod health;
pub mod login;
pub mod messages;
pub mod preauth;
pub mod schedule;
