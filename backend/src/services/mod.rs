pub mod clock;
pub mod receipts;

pub use clock::{Clock, FixedClock, SystemClock};
pub use receipts::{LogReceiptNotifier, ReceiptError, ReceiptNotifier, WebhookReceiptNotifier};
