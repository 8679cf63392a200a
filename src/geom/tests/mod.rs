mod test_bspline_basic;
mod test_curve_fit_basic;
