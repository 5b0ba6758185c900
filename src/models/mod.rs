pub mod client;
pub mod client_credit;
pub mod entity;
pub mod invoice;
pub mod money;
pub mod payment;

pub use client::ClientAccount;
pub use client_credit::ClientCredit;
pub use entity::{EntityMeta, RecordState};
pub use invoice::{Invoice, InvoiceRecord, InvoiceStatus, NewInvoice};
pub use money::Money;
pub use payment::{NewPayment, Payment, PaymentApplication, PaymentMethod, PaymentRecord};
