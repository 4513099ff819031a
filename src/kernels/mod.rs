pub mod bilinear_interp;
