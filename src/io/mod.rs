// Purpose - external interfaces: the MIDI event surface the host feeds in
// and the aggregate event stream the engine reports back out.

pub mod midi;
