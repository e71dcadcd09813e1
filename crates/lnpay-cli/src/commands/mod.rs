pub mod decodepay;
pub mod getinfo;
pub mod listforwards;
pub mod listsendpays;
pub mod pay;
pub mod paystatus;
pub mod sendpay;
pub mod setchannelfee;
pub mod waitsendpay;
