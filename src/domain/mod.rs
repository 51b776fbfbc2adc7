pub mod hs_code;
