//! Integration tests for the agent library

mod fakes;
mod test_dispatcher;
mod test_link;
mod test_topics;
