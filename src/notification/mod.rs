pub mod dispatcher;
pub mod model;

pub use dispatcher::NotificationDispatcher;
pub use model::{Notification, NotificationRequest, NotificationType};
