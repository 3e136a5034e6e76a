//! sea-orm entities owned (or conditionally written) by the checkout
//! subsystem.

pub mod bank_account;
pub mod cart;
pub mod cart_item;
pub mod coupon;
pub mod coupon_usage;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;

pub use bank_account::Entity as BankAccount;
pub use cart::Entity as Cart;
pub use cart_item::Entity as CartItem;
pub use coupon::Entity as Coupon;
pub use coupon_usage::Entity as CouponUsage;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use payment::Entity as Payment;
pub use product::Entity as Product;

pub type CartModel = cart::Model;
pub type CouponModel = coupon::Model;
pub type OrderModel = order::Model;
pub type PaymentModel = payment::Model;
pub type ProductModel = product::Model;
