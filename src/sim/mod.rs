pub mod device_sim;
