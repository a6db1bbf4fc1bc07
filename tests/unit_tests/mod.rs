mod accumulation;
mod loops;
mod mapping;
mod mortar;
mod quadrature;
