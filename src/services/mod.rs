pub mod locator;
pub mod publisher;
pub mod resolver;
pub mod thumbnail;
