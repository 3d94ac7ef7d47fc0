pub mod mailgun;
pub mod mandrill;
