mod fixtures;



#[cfg(test)]
mod resource_limits;

#[cfg(test)]
mod scenario;
