mod shapes;
mod univariate;
